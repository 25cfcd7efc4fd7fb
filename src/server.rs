//! HTTP server handed to plugins.
//!
//! The server starts with an empty route table. Plugins add routes during
//! `init` (or later); a single axum fallback looks every request up in the
//! table, so routes can be added while the server is already serving.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use axum::http::{Method, StatusCode};

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen port could not be bound.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// An inbound HTTP request, reduced to what plugins need.
#[derive(Debug, Clone)]
pub struct WebRequest {
    /// Request method.
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request body as text.
    pub body: String,
}

impl WebRequest {
    /// Decode an `application/x-www-form-urlencoded` body, such as a Slack
    /// slash command payload. Repeated keys keep the last value.
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }
}

/// A response produced by a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    /// Status code.
    pub status: StatusCode,
    /// `Content-Type` header value.
    pub content_type: &'static str,
    /// Response body.
    pub body: String,
}

impl WebResponse {
    /// `200 OK` with a plain text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    /// `200 OK` with a JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    /// Replace the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for WebResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Handles requests for one registered route.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Produce the response for `request`.
    async fn handle(&self, request: WebRequest) -> WebResponse;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(WebRequest) -> Fut + Send + Sync,
    Fut: Future<Output = WebResponse> + Send + 'static,
{
    async fn handle(&self, request: WebRequest) -> WebResponse {
        (self)(request).await
    }
}

type RouteTable = Arc<RwLock<HashMap<(Method, String), Arc<dyn RouteHandler>>>>;

async fn dispatch(
    State(routes): State<RouteTable>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    let path = uri.path().to_owned();
    let handler = routes
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(method.clone(), path.clone()))
        .cloned();

    let Some(handler) = handler else {
        debug!(%method, %path, "no route");
        return StatusCode::NOT_FOUND.into_response();
    };

    let request = WebRequest {
        method,
        path,
        query: uri.query().map(str::to_owned),
        body,
    };
    handler.handle(request).await.into_response()
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A running HTTP server. Stops serving when dropped.
pub struct Server {
    addr: SocketAddr,
    routes: RouteTable,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("routes", &routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Server {
    /// Bind `0.0.0.0:{port}` and start serving. Port `0` picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the port cannot be bound.
    pub async fn start(port: u16) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ServerError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { port, source })?;

        let routes: RouteTable = Arc::new(RwLock::new(HashMap::new()));
        let app = Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&routes));

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "http server stopped");
            }
        });

        info!("listening on port {}", addr.port());
        Ok(Self { addr, routes, task })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register `handler` for `method` requests to `path`, replacing any
    /// handler already registered there.
    pub fn route<H>(&self, method: Method, path: &str, handler: H)
    where
        H: RouteHandler + 'static,
    {
        debug!(%method, path, "route registered");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, path.to_owned()), Arc::new(handler));
    }

    /// Returns `true` if a handler is registered for `method` and `path`.
    pub fn has_route(&self, method: &Method, path: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(method.clone(), path.to_owned()))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}
