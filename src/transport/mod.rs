//! Real-time messaging transport abstraction.
//!
//! The host needs three things from a chat service: open a session, receive
//! inbound events for that session, and send messages. [`Transport`] captures
//! that surface. [`slack::SlackTransport`] is the bundled implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::storage::StorageError;

pub mod slack;

/// Name of the event dispatched to `on` handlers when the session closes.
pub const CLOSE_EVENT: &str = "rtm_close";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of the connected bot user, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedIdentity {
    /// Service-assigned user id of the bot.
    pub id: String,
    /// Display name (handle) of the bot.
    pub name: String,
    /// Team the bot connected to, when the service reports one.
    pub team: Option<TeamInfo>,
}

/// Team (workspace) the bot is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    /// Team id.
    pub id: String,
    /// Human-readable team name.
    pub name: String,
    /// Team domain, if reported.
    #[serde(default)]
    pub domain: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// How a message reached the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent in a one-to-one channel with the bot.
    DirectMessage,
    /// Starts with a mention of the bot.
    DirectMention,
    /// Mentions the bot somewhere other than the start.
    Mention,
    /// Any other message the bot can see.
    Ambient,
}

impl MessageKind {
    /// Returns the conventional event name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectMessage => "direct_message",
            Self::DirectMention => "direct_mention",
            Self::Mention => "mention",
            Self::Ambient => "ambient",
        }
    }
}

/// Set of message kinds a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope(&'static [MessageKind]);

impl Scope {
    /// Direct mentions and direct messages.
    pub const DIRECT: Scope = Scope(&[MessageKind::DirectMention, MessageKind::DirectMessage]);

    /// Every message kind.
    pub const ALL: Scope = Scope(&[
        MessageKind::DirectMessage,
        MessageKind::DirectMention,
        MessageKind::Mention,
        MessageKind::Ambient,
    ]);

    /// Build a scope from an explicit list of kinds.
    pub const fn new(kinds: &'static [MessageKind]) -> Self {
        Self(kinds)
    }

    /// Returns `true` when messages of `kind` fall inside this scope.
    pub fn accepts(&self, kind: MessageKind) -> bool {
        self.0.contains(&kind)
    }
}

/// A conversational message delivered to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Team the message was sent in, when known.
    pub team: Option<String>,
    /// Channel id.
    pub channel: String,
    /// Author user id.
    pub user: String,
    /// Message text. For direct mentions the leading mention is stripped.
    pub text: String,
    /// How the message reached the bot.
    pub kind: MessageKind,
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

/// A structured block attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Bold heading.
    pub title: String,
    /// Body text.
    pub text: String,
    /// Sidebar color as a hex string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A message to send to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Target channel id.
    pub channel: String,
    /// Plain text body.
    pub text: String,
    /// Structured attachments.
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// A plain text message.
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// Append an attachment.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// Events a transport delivers for an open session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A conversational message.
    Message(IncomingMessage),
    /// Any other named service event, forwarded to `on` handlers.
    Event {
        /// Event name (e.g. `hello`, `presence_change`).
        name: String,
        /// Raw event payload.
        payload: serde_json::Value,
    },
    /// The session ended. Emitted exactly once per successful `connect`.
    Closed {
        /// Close reason, if the service gave one.
        reason: Option<String>,
    },
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The service answered with an error.
    #[error("API error: {0}")]
    Api(String),
    /// No credential was configured.
    #[error("missing auth token")]
    MissingToken,
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Websocket handshake or frame error.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// Payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Persisting session metadata failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A real-time messaging service connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session and return the bot's identity.
    ///
    /// Inbound events for the session are pushed into `events`. When the
    /// session ends the transport emits exactly one [`TransportEvent::Closed`].
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectedIdentity, TransportError>;

    /// Send a message.
    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError>;
}
