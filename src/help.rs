//! Help command table.
//!
//! Built once from the plugin list after plugins are initialized. Every
//! plugin with complete help metadata gets a `help <command>` listener; a
//! final `help` listener lists all of them.

use std::sync::Arc;

use regex::Regex;

use crate::plugins::{HelpContext, HelpText, Plugins};
use crate::session::Session;
use crate::transport::{IncomingMessage, Scope};

/// Reply to `help` when no plugin declares help.
pub const NO_HELP_REPLY: &str =
    "I can't help you with anything right now. I still like you though :heart:";

/// First line of the `help` summary.
pub const HELP_HEADER: &str = "Here are some things I can help you with:\n";

/// One `help <command>` responder.
#[derive(Debug, Clone)]
pub struct HelpEntry {
    /// Command word after `help`.
    pub command: String,
    /// Reply text.
    pub text: HelpText,
}

impl HelpEntry {
    /// Summary line advertising this command.
    pub fn usage_line(&self, bot_name: &str) -> String {
        format!("`@{bot_name} help {}`", self.command)
    }

    /// Reply for a `help <command>` request.
    pub fn respond(&self, ctx: &HelpContext) -> String {
        self.text.render(ctx)
    }
}

/// Help entries plus the summary shown for bare `help`.
#[derive(Debug, Clone)]
pub struct HelpTable {
    bot_name: String,
    entries: Vec<HelpEntry>,
}

impl HelpTable {
    /// Collect entries from plugins with a non-empty command and text, in
    /// plugin order. Duplicate commands are kept.
    pub fn from_plugins(plugins: &Plugins, bot_name: &str) -> Self {
        let entries = plugins
            .iter()
            .filter_map(|p| p.help())
            .filter_map(|help| {
                help.complete().map(|(command, text)| HelpEntry {
                    command: command.to_owned(),
                    text: text.clone(),
                })
            })
            .collect();
        Self {
            bot_name: bot_name.to_owned(),
            entries,
        }
    }

    /// Entries in plugin order.
    pub fn entries(&self) -> &[HelpEntry] {
        &self.entries
    }

    /// Reply to a bare `help`.
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return NO_HELP_REPLY.to_owned();
        }
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.usage_line(&self.bot_name))
            .collect();
        format!("{HELP_HEADER}{}", lines.join("\n"))
    }

    /// Register one listener per entry, then the summary listener.
    ///
    /// Returns the number of listeners registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener pattern fails to compile.
    pub fn register(&self, session: &Session) -> Result<usize, regex::Error> {
        for entry in &self.entries {
            let pattern = Regex::new(&format!("^help {}$", regex::escape(&entry.command)))?;
            let entry = Arc::new(entry.clone());
            let fallback_name = self.bot_name.clone();
            session.hears_with(
                vec![pattern],
                Scope::DIRECT,
                Arc::new(move |session: Session, message: IncomingMessage| {
                    let entry = Arc::clone(&entry);
                    let bot_name = session
                        .identity()
                        .map_or_else(|| fallback_name.clone(), |me| me.name);
                    async move {
                        let ctx = HelpContext::from_message(bot_name, &message);
                        session.reply(&message, entry.respond(&ctx)).await?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            );
        }

        let summary = self.summary();
        session.hears_with(
            vec![Regex::new("^help$")?],
            Scope::DIRECT,
            Arc::new(move |session: Session, message: IncomingMessage| {
                let summary = summary.clone();
                async move {
                    session.reply(&message, summary).await?;
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );

        Ok(self.entries.len().saturating_add(1))
    }
}

/// Build the help table for `plugins` and register its listeners.
///
/// Returns the number of listeners registered.
///
/// # Errors
///
/// Returns an error if a listener pattern fails to compile.
pub fn build(session: &Session, plugins: &Plugins, bot_name: &str) -> Result<usize, regex::Error> {
    HelpTable::from_plugins(plugins, bot_name).register(session)
}
