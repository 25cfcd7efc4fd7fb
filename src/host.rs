//! The bot host: wires server, transport, plugins and dispatch together.
//!
//! Startup order:
//! 1. start the HTTP server when a listen port is configured
//! 2. connect (a failure here is fatal)
//! 3. initialize plugins and register help listeners, once
//! 4. pump transport events until shutdown, reconnecting when the session
//!    closes

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::connection::{ConnectionManager, Fatal};
use crate::plugins::{Coordinator, InitError, Plugins};
use crate::server::{Server, ServerError};
use crate::session::router::MessageRouter;
use crate::session::Session;
use crate::storage::{MemoryStorage, Storage};
use crate::transport::slack::{SlackConfig, SlackTransport};
use crate::transport::{Transport, TransportEvent, CLOSE_EVENT};

/// Buffered transport events before the reader task waits.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that stop the host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Connecting or reconnecting failed.
    #[error(transparent)]
    Fatal(#[from] Fatal),
    /// A plugin failed to initialize.
    #[error(transparent)]
    Init(#[from] InitError),
    /// The HTTP server could not start.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// No auth token was configured.
    #[error("an auth token is required to connect")]
    MissingToken,
}

impl HostError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Fatal(fatal) => fatal.exit_code(),
            Self::Init(_) | Self::Server(_) | Self::MissingToken => 1,
        }
    }
}

/// Host settings. Immutable once the host is built.
#[derive(Clone)]
pub struct HostConfig {
    /// Transport credential.
    pub token: String,
    /// Verbose transport logging.
    pub debug: bool,
    /// Plugins, initialized in this order.
    pub plugins: Plugins,
    /// Bot state storage.
    pub storage: Arc<dyn Storage>,
    /// Start an HTTP server on this port and hand it to plugins.
    pub listen_port: Option<u16>,
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("token", &"[REDACTED]")
            .field("debug", &self.debug)
            .field("plugins", &self.plugins)
            .field("listen_port", &self.listen_port)
            .finish_non_exhaustive()
    }
}

impl HostConfig {
    /// Settings with no plugins, in-memory storage and no HTTP server.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            debug: false,
            plugins: Plugins::default(),
            storage: Arc::new(MemoryStorage::default()),
            listen_port: None,
        }
    }

    /// Set verbose transport logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the plugin list. A single plugin becomes a one-element list.
    pub fn plugins(mut self, plugins: impl Into<Plugins>) -> Self {
        self.plugins = plugins.into();
        self
    }

    /// Set the storage backend.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Start an HTTP server on `port`.
    pub fn listen_port(mut self, port: Option<u16>) -> Self {
        self.listen_port = port;
        self
    }
}

/// A configured bot, ready to run.
pub struct Host {
    transport: Arc<dyn Transport>,
    session: Session,
    coordinator: Coordinator,
    listen_port: Option<u16>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("coordinator", &self.coordinator)
            .field("listen_port", &self.listen_port)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Build a host over an explicit transport.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingToken`] if the token is empty.
    pub fn new(config: HostConfig, transport: Arc<dyn Transport>) -> Result<Self, HostError> {
        if config.token.trim().is_empty() {
            return Err(HostError::MissingToken);
        }
        let session = Session::new(Arc::clone(&transport), Arc::clone(&config.storage));
        Ok(Self {
            transport,
            session,
            coordinator: Coordinator::new(config.plugins),
            listen_port: config.listen_port,
        })
    }

    /// Build a host connected to Slack.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingToken`] if the token is empty.
    pub fn slack(config: HostConfig) -> Result<Self, HostError> {
        let mut slack = SlackConfig::new(config.token.clone());
        slack.debug = config.debug;
        let transport = Arc::new(SlackTransport::new(slack, Arc::clone(&config.storage)));
        Self::new(config, transport)
    }

    /// The session plugins register on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The plugin coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Run until Ctrl-C.
    ///
    /// # Errors
    ///
    /// See [`Host::run_until`].
    pub async fn run(self) -> Result<(), HostError> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a failed connect or reconnect, a
    /// plugin that failed to initialize, or a server that could not bind.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()>,
    {
        let server = match self.listen_port {
            Some(port) => Some(Server::start(port).await?),
            None => None,
        };

        let (events_tx, mut events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut connection = ConnectionManager::new(Arc::clone(&self.transport), events_tx);

        let identity = connection.connect().await?;
        info!(bot = %identity.name, id = %identity.id, "connected");
        self.session.set_identity(identity.clone());
        self.coordinator
            .initialize_all(&self.session, &identity, server.as_ref())?;

        let router = MessageRouter::new(self.session.clone());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutting down");
                    return Ok(());
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    match event {
                        TransportEvent::Message(message) => router.route(message).await,
                        TransportEvent::Event { name, payload } => {
                            self.session.dispatch_event(&name, payload).await;
                        }
                        TransportEvent::Closed { reason } => {
                            debug!(?reason, "transport session closed");
                            self.session
                                .dispatch_event(CLOSE_EVENT, serde_json::json!({ "reason": reason }))
                                .await;
                            let identity = connection.reconnect().await?;
                            debug!(bot = %identity.name, "reconnected");
                            self.session.set_identity(identity);
                        }
                    }
                }
            }
        }
    }
}
