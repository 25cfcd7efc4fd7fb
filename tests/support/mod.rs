//! Shared fixtures: a scripted transport, a recording plugin and a log
//! capture layer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use ribcage::plugins::{Plugin, PluginHelp};
use ribcage::server::Server;
use ribcage::session::Session;
use ribcage::storage::MemoryStorage;
use ribcage::transport::{
    ConnectedIdentity, IncomingMessage, MessageKind, OutgoingMessage, TeamInfo, Transport,
    TransportError, TransportEvent,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const BOT_ID: &str = "UBOT";
pub const BOT_NAME: &str = "ribbot";

pub fn identity() -> ConnectedIdentity {
    ConnectedIdentity {
        id: BOT_ID.to_owned(),
        name: BOT_NAME.to_owned(),
        team: Some(TeamInfo {
            id: "T1".to_owned(),
            name: "Acme".to_owned(),
            domain: Some("acme".to_owned()),
        }),
    }
}

/// A message from `U1` in channel `C1`.
pub fn message(text: &str, kind: MessageKind) -> IncomingMessage {
    IncomingMessage {
        team: Some("T1".to_owned()),
        channel: "C1".to_owned(),
        user: "U1".to_owned(),
        text: text.to_owned(),
        kind,
    }
}

/// A direct mention from `U1` in channel `C1`.
pub fn mention(text: &str) -> IncomingMessage {
    message(text, MessageKind::DirectMention)
}

/// A session over a fresh fake transport, already connected.
pub fn session() -> (Session, Arc<FakeTransport>) {
    let transport = FakeTransport::new();
    let session = Session::new(transport.clone(), Arc::new(MemoryStorage::default()));
    session.set_identity(identity());
    (session, transport)
}

// ---------------------------------------------------------------------------
// Fake transport
// ---------------------------------------------------------------------------

/// Transport whose connect results are scripted and whose sends are recorded.
#[derive(Default)]
pub struct FakeTransport {
    outcomes: Mutex<VecDeque<Result<ConnectedIdentity, TransportError>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    connects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful connect.
    pub fn push_ok(&self, identity: ConnectedIdentity) {
        self.outcomes.lock().expect("lock").push_back(Ok(identity));
    }

    /// Queue a failed connect.
    pub fn push_err(&self, error: &str) {
        self.outcomes
            .lock()
            .expect("lock")
            .push_back(Err(TransportError::Api(error.to_owned())));
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }

    /// Push an event through the sender handed to the latest connect.
    pub async fn emit(&self, event: TransportEvent) {
        let tx = self
            .events
            .lock()
            .expect("lock")
            .clone()
            .expect("transport not connected");
        tx.send(event).await.expect("event receiver dropped");
    }

    /// Wait until at least `count` messages were sent.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<OutgoingMessage> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} sent messages, got {:?}", self.sent_texts());
    }

    /// Wait until `connect` was called `count` times.
    pub async fn wait_for_connects(&self, count: usize) {
        for _ in 0..200 {
            if self.connect_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} connects, got {}", self.connect_count());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectedIdentity, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Api("no scripted outcome".to_owned())));
        if outcome.is_ok() {
            *self.events.lock().expect("lock") = Some(events);
        }
        outcome
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.sent.lock().expect("lock").push(message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recording plugin
// ---------------------------------------------------------------------------

/// Plugin that records its `init` calls into a shared log.
pub struct RecordingPlugin {
    pub name: String,
    pub help: Option<PluginHelp>,
    pub fail: bool,
    pub log: Arc<Mutex<Vec<String>>>,
    pub saw_server: Arc<Mutex<Vec<bool>>>,
}

impl RecordingPlugin {
    pub fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_owned(),
            help: None,
            fail: false,
            log: Arc::clone(log),
            saw_server: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_help(mut self, help: PluginHelp) -> Self {
        self.help = Some(help);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(
        &self,
        _session: &Session,
        _identity: &ConnectedIdentity,
        server: Option<&Server>,
    ) -> anyhow::Result<()> {
        self.log.lock().expect("lock").push(self.name.clone());
        self.saw_server.lock().expect("lock").push(server.is_some());
        if self.fail {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    fn help(&self) -> Option<PluginHelp> {
        self.help.clone()
    }
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Layer that keeps every event it sees.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedLogs {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().expect("lock").clone()
    }

    /// Events at `level` emitted from `target`.
    pub fn at(&self, level: Level, target: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level && e.target == target)
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0.lock().expect("lock").push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_owned(),
            message: visitor.0,
        });
    }
}

/// Route this thread's events into a fresh capture until the guard drops.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(logs.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
