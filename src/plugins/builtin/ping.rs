//! Liveness check over chat and HTTP.

use async_trait::async_trait;
use tracing::debug;

use crate::menu::MenuOption;
use crate::plugins::{Plugin, PluginHelp};
use crate::server::{Method, Server, WebRequest, WebResponse};
use crate::session::{Conversation, Session};
use crate::transport::{ConnectedIdentity, IncomingMessage, Scope};

/// Configuration name.
pub const NAME: &str = "ping";

/// Slash command endpoint registered when a server is available.
pub const ROUTE: &str = "/slack/ping";

/// Replies `pong` to `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ping;

impl Plugin for Ping {
    fn name(&self) -> &str {
        NAME
    }

    fn init(
        &self,
        session: &Session,
        _identity: &ConnectedIdentity,
        server: Option<&Server>,
    ) -> anyhow::Result<()> {
        session.hears(
            &["^ping$"],
            Scope::DIRECT,
            |session: Session, message: IncomingMessage| async move {
                session.reply(&message, "pong").await?;
                Ok::<(), anyhow::Error>(())
            },
        )?;

        if let Some(server) = server {
            server.route(Method::POST, ROUTE, |request: WebRequest| async move {
                let form = request.form();
                debug!(user = ?form.get("user_name"), "slash command ping");
                WebResponse::text("pong")
            });
        }
        Ok(())
    }

    fn help(&self) -> Option<PluginHelp> {
        Some(PluginHelp::new(
            NAME,
            "Say `ping` and I answer `pong`. Handy to check I'm still here.",
        ))
    }
}

#[async_trait]
impl MenuOption for Ping {
    fn display_name(&self) -> &str {
        NAME
    }

    async fn on_selected(&self, _reply: IncomingMessage, convo: Conversation) -> anyhow::Result<()> {
        convo
            .say("Mention me with `ping` and I'll answer `pong`.")
            .await?;
        Ok(())
    }
}
