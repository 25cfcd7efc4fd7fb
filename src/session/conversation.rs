//! Question-and-answer conversations.
//!
//! A [`Conversation`] is bound to one user in one channel. [`Conversation::ask`]
//! sends a question and parks the conversation on the session; the next
//! message from that user in that channel is handed to the first
//! [`ReplyMatcher`] that accepts it instead of the regular listeners. A
//! matcher returning [`Turn::Repeat`] re-sends the question and parks again
//! with the same matchers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ConversationKey, Session};
use crate::transport::{Attachment, IncomingMessage, OutgoingMessage, TransportError};

/// How long a question waits for an answer before the conversation is
/// dropped.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1800);

/// What a reply handler wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// The question is answered. The handler may have parked a new one.
    Done,
    /// Ask the same question again.
    Repeat,
}

/// Handles a reply to a question.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    /// Handle `reply` within `convo`.
    async fn on_reply(&self, reply: IncomingMessage, convo: Conversation) -> anyhow::Result<Turn>;
}

#[async_trait]
impl<F, Fut> ReplyHandler for F
where
    F: Fn(IncomingMessage, Conversation) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Turn>> + Send + 'static,
{
    async fn on_reply(&self, reply: IncomingMessage, convo: Conversation) -> anyhow::Result<Turn> {
        (self)(reply, convo).await
    }
}

/// One branch of a question: a pattern (or catch-all) and its handler.
#[derive(Clone)]
pub struct ReplyMatcher {
    pattern: Option<Regex>,
    handler: Arc<dyn ReplyHandler>,
}

impl std::fmt::Debug for ReplyMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyMatcher")
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .finish_non_exhaustive()
    }
}

impl ReplyMatcher {
    /// Accept replies matching `pattern` (unanchored).
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn pattern<F, Fut>(pattern: &str, handler: F) -> Result<Self, regex::Error>
    where
        F: Fn(IncomingMessage, Conversation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Turn>> + Send + 'static,
    {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
            handler: Arc::new(handler),
        })
    }

    /// Accept any reply.
    pub fn fallback<F, Fut>(handler: F) -> Self
    where
        F: Fn(IncomingMessage, Conversation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Turn>> + Send + 'static,
    {
        Self {
            pattern: None,
            handler: Arc::new(handler),
        }
    }

    /// Returns `true` if this matcher accepts `text`.
    pub fn accepts(&self, text: &str) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.is_match(text))
    }
}

/// A conversation parked on the session, waiting for a reply.
pub(crate) struct PendingAsk {
    convo: Conversation,
    question: String,
    matchers: Vec<ReplyMatcher>,
    parked_at: Instant,
}

impl PendingAsk {
    /// Returns `true` once the question has gone unanswered for `max_age`.
    pub(crate) fn is_stale(&self, max_age: Duration) -> bool {
        self.parked_at.elapsed() >= max_age
    }
}

/// A conversation with one user in one channel.
#[derive(Clone)]
pub struct Conversation {
    session: Session,
    origin: IncomingMessage,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    pub(crate) fn new(session: Session, origin: IncomingMessage) -> Self {
        Self { session, origin }
    }

    /// The message that started the conversation.
    pub fn origin(&self) -> &IncomingMessage {
        &self.origin
    }

    /// The session the conversation runs on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send text into the conversation's channel.
    ///
    /// # Errors
    ///
    /// Returns the transport error if sending fails.
    pub async fn say(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.session.reply(&self.origin, text).await
    }

    /// Send attachments into the conversation's channel.
    ///
    /// # Errors
    ///
    /// Returns the transport error if sending fails.
    pub async fn say_attachments(&self, attachments: Vec<Attachment>) -> Result<(), TransportError> {
        let message = attachments
            .into_iter()
            .fold(OutgoingMessage::text(self.origin.channel.clone(), ""), |message, attachment| {
                message.with_attachment(attachment)
            });
        self.session.say(message).await
    }

    /// Send `question` and wait for the author's next message.
    ///
    /// Matchers are tried in order; a reply no matcher accepts ends the
    /// conversation, and so does no reply within [`REPLY_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns the transport error if the question cannot be sent. The
    /// conversation is not parked in that case.
    pub async fn ask(
        &self,
        question: impl Into<String>,
        matchers: Vec<ReplyMatcher>,
    ) -> Result<(), TransportError> {
        let question = question.into();
        self.say(question.clone()).await?;
        self.session.park(
            ConversationKey::from(&self.origin),
            PendingAsk {
                convo: self.clone(),
                question,
                matchers,
                parked_at: Instant::now(),
            },
        );
        Ok(())
    }
}

/// Hand `reply` to the parked conversation.
pub(crate) async fn resume(pending: PendingAsk, reply: IncomingMessage) {
    let Some(matcher) = pending
        .matchers
        .iter()
        .find(|m| m.accepts(&reply.text))
        .cloned()
    else {
        debug!("reply matched no branch, conversation ended");
        return;
    };

    match matcher.handler.on_reply(reply, pending.convo.clone()).await {
        Ok(Turn::Done) => {}
        Ok(Turn::Repeat) => {
            if let Err(e) = pending.convo.ask(pending.question, pending.matchers).await {
                warn!(error = %e, "failed to repeat question");
            }
        }
        Err(e) => warn!(error = %e, "reply handler failed"),
    }
}
