//! Per-conversation message serialization.
//!
//! Each [`ConversationKey`] gets its own worker task fed by a bounded
//! channel, so messages from one user in one channel are handled in
//! arrival order while different conversations run concurrently. Workers
//! exit after sitting idle and are replaced on the next message. A worker
//! with an unanswered question outlives the idle timeout until the question
//! expires.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{ConversationKey, Session};
use crate::transport::IncomingMessage;

/// Buffered messages per conversation before senders wait.
const WORKER_CHANNEL_CAPACITY: usize = 32;

/// How long a worker waits for another message before exiting.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Fans inbound messages out to per-conversation workers.
#[derive(Debug)]
pub struct MessageRouter {
    session: Session,
    workers: Mutex<HashMap<ConversationKey, mpsc::Sender<IncomingMessage>>>,
}

impl MessageRouter {
    /// Create a router dispatching into `session`.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Hand `message` to its conversation's worker, starting one if needed.
    pub async fn route(&self, message: IncomingMessage) {
        let key = ConversationKey::from(&message);

        let existing = {
            let mut workers = self.workers.lock().await;
            workers.retain(|_, tx| !tx.is_closed());
            workers.get(&key).cloned()
        };

        let message = match existing {
            Some(tx) => match tx.send(message).await {
                Ok(()) => return,
                // The worker timed out between the lookup and the send.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let tx = self.spawn_worker(key.clone());
        if let Err(e) = tx.send(message).await {
            warn!(channel = %key.channel, error = %e, "failed to hand message to new worker");
            return;
        }
        self.workers.lock().await.insert(key, tx);
    }

    /// Number of conversations with a live worker.
    pub async fn active_conversations(&self) -> usize {
        let mut workers = self.workers.lock().await;
        workers.retain(|_, tx| !tx.is_closed());
        workers.len()
    }

    fn spawn_worker(&self, key: ConversationKey) -> mpsc::Sender<IncomingMessage> {
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        tokio::spawn(run_worker(self.session.clone(), key, rx));
        tx
    }
}

async fn run_worker(
    session: Session,
    key: ConversationKey,
    mut rx: mpsc::Receiver<IncomingMessage>,
) {
    debug!(channel = %key.channel, user = %key.user, "conversation worker started");
    loop {
        match tokio::time::timeout(WORKER_IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(message)) => session.dispatch_message(message).await,
            Ok(None) => break,
            Err(_) => {
                // Keep the worker while a question is pending so the reply
                // stays ordered behind it, until the question goes stale.
                if session.expire_conversation(&key) {
                    continue;
                }
                break;
            }
        }
    }
    // Anything queued between the timeout and close still gets handled.
    rx.close();
    while let Some(message) = rx.recv().await {
        session.dispatch_message(message).await;
    }
    debug!(channel = %key.channel, user = %key.user, "conversation worker stopped");
}
