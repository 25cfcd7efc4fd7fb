//! Tells a user who and where they are.

use async_trait::async_trait;

use crate::menu::MenuOption;
use crate::plugins::{HelpText, Plugin, PluginHelp};
use crate::server::Server;
use crate::session::{Conversation, Session};
use crate::storage::Collection;
use crate::transport::{ConnectedIdentity, IncomingMessage, Scope, TeamInfo};

/// Configuration name.
pub const NAME: &str = "whoami";

/// Answers `whoami` with the asker's user, channel and team.
#[derive(Debug, Clone, Copy, Default)]
pub struct Whoami;

impl Plugin for Whoami {
    fn name(&self) -> &str {
        NAME
    }

    fn init(
        &self,
        session: &Session,
        _identity: &ConnectedIdentity,
        _server: Option<&Server>,
    ) -> anyhow::Result<()> {
        session.hears(
            &["^whoami$"],
            Scope::DIRECT,
            |session: Session, message: IncomingMessage| async move {
                let team = team_name(&session, message.team.as_deref()).await;
                session
                    .reply(&message, describe(&message, team.as_deref()))
                    .await?;
                Ok::<(), anyhow::Error>(())
            },
        )?;
        Ok(())
    }

    fn help(&self) -> Option<PluginHelp> {
        Some(PluginHelp::new(
            NAME,
            HelpText::dynamic(|ctx| {
                format!(
                    "Ask `@{} whoami` and I'll tell you who you are, <@{}>.",
                    ctx.bot_name, ctx.user
                )
            }),
        ))
    }
}

#[async_trait]
impl MenuOption for Whoami {
    fn display_name(&self) -> &str {
        NAME
    }

    async fn on_selected(&self, reply: IncomingMessage, convo: Conversation) -> anyhow::Result<()> {
        let team = team_name(convo.session(), reply.team.as_deref()).await;
        convo.say(describe(&reply, team.as_deref())).await?;
        Ok(())
    }
}

/// The reply to `whoami`.
pub fn describe(message: &IncomingMessage, team: Option<&str>) -> String {
    match team {
        Some(team) => format!(
            "You are <@{}> in <#{}> on {team}.",
            message.user, message.channel
        ),
        None => format!("You are <@{}> in <#{}>.", message.user, message.channel),
    }
}

async fn team_name(session: &Session, team_id: Option<&str>) -> Option<String> {
    let record = session
        .storage()
        .get(Collection::Teams, team_id?)
        .await
        .ok()??;
    serde_json::from_value::<TeamInfo>(record)
        .ok()
        .map(|team| team.name)
}
