//! Slack RTM transport.
//!
//! `rtm.connect` hands back a websocket URL plus the bot's own identity. A
//! reader task owns the socket for the lifetime of the session, classifies
//! inbound frames into [`TransportEvent`]s and reports closure exactly once.
//! Outbound messages go through the `chat.postMessage` Web API so that
//! attachments are supported.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{
    Attachment, ConnectedIdentity, IncomingMessage, MessageKind, OutgoingMessage, TeamInfo,
    Transport, TransportError, TransportEvent,
};
use crate::storage::{Collection, Storage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Base URL for the Slack Web API.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Interval between application-level pings on an idle socket.
const PING_INTERVAL_SECS: u64 = 30;

/// Slack transport configuration.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub token: String,
    /// Log every raw frame at debug level.
    pub debug: bool,
    /// Web API base URL. Overridable for tests and proxies.
    pub api_base: String,
}

impl SlackConfig {
    /// Configuration against the public Slack API.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            debug: false,
            api_base: SLACK_API_BASE.to_owned(),
        }
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"[REDACTED]")
            .field("debug", &self.debug)
            .field("api_base", &self.api_base)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slack API types (minimal subset)
// ---------------------------------------------------------------------------

/// `rtm.connect` response.
#[derive(Debug, Deserialize)]
struct RtmConnectResponse {
    ok: bool,
    url: Option<String>,
    #[serde(rename = "self")]
    me: Option<RtmSelf>,
    team: Option<TeamInfo>,
    error: Option<String>,
}

/// The `self` block of `rtm.connect`.
#[derive(Debug, Deserialize)]
struct RtmSelf {
    id: String,
    name: String,
}

/// Generic Web API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
}

/// `chat.postMessage` request body.
#[derive(Debug, Serialize)]
struct PostMessage {
    channel: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,
    as_user: bool,
}

/// Fields of an RTM frame the reader cares about.
#[derive(Debug, Deserialize)]
struct RtmFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    subtype: Option<String>,
    channel: Option<String>,
    user: Option<String>,
    text: Option<String>,
    team: Option<String>,
}

/// Result of interpreting one RTM text frame.
#[derive(Debug)]
pub enum Frame {
    /// Forward this event to the host.
    Event(TransportEvent),
    /// The server announced it is about to close the socket.
    Goodbye,
    /// Nothing to forward (acks, pongs, own messages, edits).
    Ignored,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Slack RTM transport.
pub struct SlackTransport {
    config: SlackConfig,
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for SlackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SlackTransport {
    /// Create a transport. `storage` receives the team record on every connect.
    pub fn new(config: SlackConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            storage,
        }
    }

    /// Call `rtm.connect` and return the socket URL with the bot identity.
    async fn rtm_connect(&self) -> Result<(String, ConnectedIdentity), TransportError> {
        let url = format!("{}/rtm.connect", self.config.api_base);
        let response: RtmConnectResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(TransportError::Api(
                response.error.unwrap_or_else(|| "unknown_error".to_owned()),
            ));
        }

        match (response.url, response.me) {
            (Some(socket_url), Some(me)) => Ok((
                socket_url,
                ConnectedIdentity {
                    id: me.id,
                    name: me.name,
                    team: response.team,
                },
            )),
            _ => Err(TransportError::Api(
                "rtm.connect response missing url or self".to_owned(),
            )),
        }
    }
}

#[async_trait]
impl Transport for SlackTransport {
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<ConnectedIdentity, TransportError> {
        if self.config.token.trim().is_empty() {
            return Err(TransportError::MissingToken);
        }

        let (socket_url, identity) = self.rtm_connect().await?;

        if let Some(team) = &identity.team {
            self.storage
                .save(Collection::Teams, &team.id, serde_json::to_value(team)?)
                .await?;
        }

        let (socket, _response) = tokio_tungstenite::connect_async(socket_url.as_str()).await?;
        debug!(
            bot = %identity.name,
            team = identity.team.as_ref().map(|t| t.name.as_str()).unwrap_or("-"),
            "rtm socket open"
        );

        let reader = RtmReader {
            self_id: identity.id.clone(),
            team_id: identity.team.as_ref().map(|t| t.id.clone()),
            debug: self.config.debug,
        };
        tokio::spawn(reader.run(socket, events));

        Ok(identity)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        let url = format!("{}/chat.postMessage", self.config.api_base);
        let body = PostMessage {
            channel: message.channel,
            text: message.text,
            attachments: message.attachments,
            as_user: true,
        };

        let response: ApiResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(TransportError::Api(
                response.error.unwrap_or_else(|| "unknown_error".to_owned()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Socket reader
// ---------------------------------------------------------------------------

/// Owns one RTM socket until it closes.
struct RtmReader {
    self_id: String,
    team_id: Option<String>,
    debug: bool,
}

impl RtmReader {
    async fn run(
        self,
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        let (mut sink, mut stream) = socket.split();
        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        // The first tick fires immediately.
        ping.tick().await;
        let mut ping_id: u64 = 0;

        let reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.debug {
                            debug!(frame = %text.as_str(), "rtm frame");
                        }
                        match parse_frame(&self.self_id, self.team_id.as_deref(), text.as_str()) {
                            Ok(Frame::Event(event)) => {
                                if events.send(event).await.is_err() {
                                    break Some("event receiver dropped".to_owned());
                                }
                            }
                            Ok(Frame::Goodbye) => debug!("rtm goodbye received"),
                            Ok(Frame::Ignored) => {}
                            Err(e) => warn!(error = %e, "failed to parse rtm frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            break Some(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break frame.map(|f| f.reason.to_string()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                },
                _ = ping.tick() => {
                    ping_id = ping_id.wrapping_add(1);
                    let frame = serde_json::json!({ "id": ping_id, "type": "ping" }).to_string();
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        break Some(e.to_string());
                    }
                }
            }
        };

        debug!(reason = reason.as_deref().unwrap_or("-"), "rtm socket closed");
        if events.send(TransportEvent::Closed { reason }).await.is_err() {
            debug!("event receiver dropped before close notification");
        }
    }
}

// ---------------------------------------------------------------------------
// Frame interpretation
// ---------------------------------------------------------------------------

/// Interpret one RTM text frame for the bot `self_id`.
///
/// Plain `message` events become [`TransportEvent::Message`]; edits, joins and
/// other subtyped messages are ignored, as are the bot's own messages. Any
/// other typed event is forwarded by name.
///
/// # Errors
///
/// Returns an error if the frame is not valid JSON.
pub fn parse_frame(
    self_id: &str,
    team_id: Option<&str>,
    raw: &str,
) -> Result<Frame, serde_json::Error> {
    let payload: serde_json::Value = serde_json::from_str(raw)?;
    let frame: RtmFrame = serde_json::from_value(payload.clone())?;

    let Some(kind) = frame.kind else {
        return Ok(Frame::Ignored);
    };

    match kind.as_str() {
        "message" => {
            if frame.subtype.is_some() {
                return Ok(Frame::Ignored);
            }
            let (Some(channel), Some(user), Some(text)) = (frame.channel, frame.user, frame.text)
            else {
                return Ok(Frame::Ignored);
            };
            if user == self_id {
                return Ok(Frame::Ignored);
            }
            let (kind, text) = classify(self_id, &channel, &text);
            Ok(Frame::Event(TransportEvent::Message(IncomingMessage {
                team: frame.team.or_else(|| team_id.map(str::to_owned)),
                channel,
                user,
                text,
                kind,
            })))
        }
        "goodbye" => Ok(Frame::Goodbye),
        "pong" => Ok(Frame::Ignored),
        _ => Ok(Frame::Event(TransportEvent::Event {
            name: kind,
            payload,
        })),
    }
}

/// Classify a message for the bot `self_id` and normalize its text.
///
/// Direct-message channel ids start with `D`. A direct mention has the
/// mention (and an optional `:`) stripped from the returned text.
pub fn classify(self_id: &str, channel: &str, text: &str) -> (MessageKind, String) {
    if channel.starts_with('D') {
        return (MessageKind::DirectMessage, text.to_owned());
    }

    if let Some(rest) = strip_leading_mention(self_id, text) {
        let rest = rest.trim_start();
        let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
        return (MessageKind::DirectMention, rest.to_owned());
    }

    if text.contains(&format!("<@{self_id}>")) || text.contains(&format!("<@{self_id}|")) {
        return (MessageKind::Mention, text.to_owned());
    }

    (MessageKind::Ambient, text.to_owned())
}

/// Strip `<@ID>` or `<@ID|name>` from the start of `text`.
fn strip_leading_mention<'a>(self_id: &str, text: &'a str) -> Option<&'a str> {
    let rest = text.strip_prefix("<@")?.strip_prefix(self_id)?;
    if let Some(after) = rest.strip_prefix('>') {
        return Some(after);
    }
    let after_label = rest.strip_prefix('|')?;
    let close = after_label.find('>')?;
    after_label.get(close..).and_then(|s| s.strip_prefix('>'))
}
