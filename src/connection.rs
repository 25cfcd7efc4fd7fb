//! Transport connection lifecycle.
//!
//! The first connect has no retry: a failure is fatal. Once connected, a
//! closed session is reconnected immediately, once; if that fails the
//! process shuts down. Failures are returned as [`Fatal`] so the binary can
//! flush logs before exiting.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::transport::{ConnectedIdentity, Transport, TransportError, TransportEvent};

/// Lifecycle state of the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session has been attempted yet.
    Disconnected,
    /// A connect or reconnect is in flight.
    Connecting,
    /// A session is open.
    Connected,
    /// Terminal: a connect or reconnect failed.
    FailedFatally,
}

/// Unrecoverable connection failures.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    /// The initial connect failed.
    #[error("error connecting to RTM: {0}")]
    Connect(#[source] TransportError),
    /// Reconnecting after a closed session failed.
    #[error("could not reconnect to the rtm: {0}")]
    Reconnect(#[source] TransportError),
}

impl Fatal {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Owns the transport session lifecycle.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<TransportEvent>,
    state: ConnectionState,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager whose sessions deliver events into `events`.
    pub fn new(transport: Arc<dyn Transport>, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            transport,
            events,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open the first session.
    ///
    /// # Errors
    ///
    /// Returns [`Fatal::Connect`] if the transport cannot connect. There is
    /// no retry.
    pub async fn connect(&mut self) -> Result<ConnectedIdentity, Fatal> {
        self.state = ConnectionState::Connecting;
        match self.transport.connect(self.events.clone()).await {
            Ok(identity) => {
                self.state = ConnectionState::Connected;
                Ok(identity)
            }
            Err(err) => {
                self.state = ConnectionState::FailedFatally;
                error!("Error connecting to RTM");
                error!(error = ?err, "{err}");
                Err(Fatal::Connect(err))
            }
        }
    }

    /// Reopen the session after the transport reported it closed.
    ///
    /// # Errors
    ///
    /// Returns [`Fatal::Reconnect`] if the transport cannot connect.
    pub async fn reconnect(&mut self) -> Result<ConnectedIdentity, Fatal> {
        info!("rtm closed, attempting to reconnect");
        self.state = ConnectionState::Connecting;
        match self.transport.connect(self.events.clone()).await {
            Ok(identity) => {
                self.state = ConnectionState::Connected;
                Ok(identity)
            }
            Err(err) => {
                self.state = ConnectionState::FailedFatally;
                error!("could not reconnect to the rtm, shutting down");
                error!(error = ?err, "{err}");
                Err(Fatal::Reconnect(err))
            }
        }
    }
}
