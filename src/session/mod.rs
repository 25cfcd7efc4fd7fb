//! The long-lived bot session plugins register against.
//!
//! A [`Session`] outlives individual transport connections. It holds the
//! `hears` listeners, named event handlers and parked conversations, and
//! sends replies through the transport. Inbound messages reach it through
//! [`router::MessageRouter`], which serializes them per conversation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::transport::{
    ConnectedIdentity, IncomingMessage, OutgoingMessage, Scope, Transport, TransportError,
};

pub mod conversation;
pub mod router;

pub use conversation::{Conversation, ReplyHandler, ReplyMatcher, Turn, REPLY_TIMEOUT};

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Handles a message that matched a `hears` listener.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle `message`.
    async fn handle(&self, session: Session, message: IncomingMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Session, IncomingMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, session: Session, message: IncomingMessage) -> anyhow::Result<()> {
        (self)(session, message).await
    }
}

/// Handles a named transport event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle the event payload.
    async fn handle(&self, session: Session, payload: serde_json::Value) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Session, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, session: Session, payload: serde_json::Value) -> anyhow::Result<()> {
        (self)(session, payload).await
    }
}

// ---------------------------------------------------------------------------
// Conversation key
// ---------------------------------------------------------------------------

/// Identifies one conversation thread: a user talking in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    /// Team id, when known.
    pub team: Option<String>,
    /// Channel id.
    pub channel: String,
    /// User id.
    pub user: String,
}

impl From<&IncomingMessage> for ConversationKey {
    fn from(message: &IncomingMessage) -> Self {
        Self {
            team: message.team.clone(),
            channel: message.channel.clone(),
            user: message.user.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Listener {
    patterns: Vec<Regex>,
    scope: Scope,
    handler: Arc<dyn MessageHandler>,
}

impl Listener {
    fn matches(&self, message: &IncomingMessage) -> bool {
        self.scope.accepts(message.kind) && self.patterns.iter().any(|p| p.is_match(&message.text))
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    identity: RwLock<Option<ConnectedIdentity>>,
    listeners: RwLock<Vec<Arc<Listener>>>,
    event_handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    conversations: Mutex<HashMap<ConversationKey, conversation::PendingAsk>>,
}

/// Shared handle to the bot session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session sending through `transport`.
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                storage,
                identity: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
                event_handlers: RwLock::new(HashMap::new()),
                conversations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The identity of the current connection, once connected.
    pub fn identity(&self) -> Option<ConnectedIdentity> {
        self.inner
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the identity reported by the latest successful connect.
    pub fn set_identity(&self, identity: ConnectedIdentity) {
        *self
            .inner
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }

    /// Bot state storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Listen for messages matching any of `patterns` within `scope`.
    ///
    /// Listeners are tried in registration order; the first match handles
    /// the message.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is not a valid regular expression.
    pub fn hears<F, Fut>(&self, patterns: &[&str], scope: Scope, handler: F) -> Result<(), regex::Error>
    where
        F: Fn(Session, IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.hears_with(patterns, scope, Arc::new(handler));
        Ok(())
    }

    /// Register a listener with precompiled patterns and a handler object.
    pub fn hears_with(&self, patterns: Vec<Regex>, scope: Scope, handler: Arc<dyn MessageHandler>) {
        debug!(
            patterns = ?patterns.iter().map(Regex::as_str).collect::<Vec<_>>(),
            "listener registered"
        );
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Listener {
                patterns,
                scope,
                handler,
            }));
    }

    /// Subscribe to a named transport event (e.g. [`crate::transport::CLOSE_EVENT`]).
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Session, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .event_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_owned())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of registered `hears` listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Returns the transport error if sending fails.
    pub async fn say(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.inner.transport.send(message).await
    }

    /// Reply in the channel `to` was sent in.
    ///
    /// # Errors
    ///
    /// Returns the transport error if sending fails.
    pub async fn reply(
        &self,
        to: &IncomingMessage,
        text: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.say(OutgoingMessage::text(to.channel.clone(), text)).await
    }

    /// Start a conversation with the author of `message`.
    ///
    /// # Errors
    ///
    /// Returns whatever `starter` returns.
    pub async fn start_conversation<F, Fut>(
        &self,
        message: &IncomingMessage,
        starter: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(IncomingMessage, Conversation) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let convo = Conversation::new(self.clone(), message.clone());
        starter(message.clone(), convo).await
    }

    /// Returns `true` if a conversation is waiting for a reply under `key`.
    pub fn is_awaiting_reply(&self, key: &ConversationKey) -> bool {
        self.conversations().contains_key(key)
    }

    /// Drop the conversation parked under `key` if its question has gone
    /// unanswered for [`REPLY_TIMEOUT`].
    ///
    /// Returns `true` if a conversation is still waiting afterwards.
    pub fn expire_conversation(&self, key: &ConversationKey) -> bool {
        let mut conversations = self.conversations();
        let stale = match conversations.get(key) {
            Some(pending) => pending.is_stale(REPLY_TIMEOUT),
            None => return false,
        };
        if !stale {
            return true;
        }
        conversations.remove(key);
        debug!(channel = %key.channel, user = %key.user, "unanswered conversation dropped");
        false
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Route one inbound message.
    ///
    /// A parked conversation for the message's author and channel takes the
    /// message first; otherwise the first matching listener handles it.
    /// Messages written by the bot itself are dropped.
    pub async fn dispatch_message(&self, message: IncomingMessage) {
        if let Some(me) = self.identity() {
            if message.user == me.id {
                return;
            }
        }

        let key = ConversationKey::from(&message);
        let pending = self.conversations().remove(&key);
        match pending {
            Some(pending) if !pending.is_stale(REPLY_TIMEOUT) => {
                conversation::resume(pending, message).await;
                return;
            }
            Some(_) => debug!(channel = %key.channel, "unanswered conversation dropped"),
            None => {}
        }

        let listener = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|l| l.matches(&message))
            .cloned();

        match listener {
            Some(listener) => {
                if let Err(e) = listener.handler.handle(self.clone(), message).await {
                    warn!(error = %e, "listener failed");
                }
            }
            None => debug!(kind = message.kind.as_str(), "no listener matched"),
        }
    }

    /// Run every handler subscribed to `event`.
    pub async fn dispatch_event(&self, event: &str, payload: serde_json::Value) {
        let handlers = self
            .inner
            .event_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.handle(self.clone(), payload.clone()).await {
                warn!(event, error = %e, "event handler failed");
            }
        }
    }

    pub(crate) fn park(&self, key: ConversationKey, pending: conversation::PendingAsk) {
        self.conversations().insert(key, pending);
    }

    fn conversations(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ConversationKey, conversation::PendingAsk>> {
        self.inner
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
