//! The "what can you do?" menu as a plugin.

use crate::menu::{Menu, MenuOptions, MENU_TRIGGER};
use crate::plugins::{Plugin, PluginHelp};
use crate::server::Server;
use crate::session::Session;
use crate::transport::ConnectedIdentity;

/// Configuration name.
pub const NAME: &str = "catalog";

/// Lists its options when asked what the bot can do.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    menu: Menu,
}

impl Catalog {
    /// A catalog listing `options`.
    pub fn new(options: MenuOptions) -> Self {
        Self {
            menu: Menu::new(options),
        }
    }

    /// The listed options.
    pub fn options(&self) -> &MenuOptions {
        self.menu.options()
    }
}

impl Plugin for Catalog {
    fn name(&self) -> &str {
        NAME
    }

    fn init(
        &self,
        session: &Session,
        _identity: &ConnectedIdentity,
        _server: Option<&Server>,
    ) -> anyhow::Result<()> {
        tracing::debug!(trigger = MENU_TRIGGER, options = self.options().len(), "catalog ready");
        self.menu.register(session)?;
        Ok(())
    }

    fn help(&self) -> Option<PluginHelp> {
        Some(PluginHelp::new(
            NAME,
            "Ask me `what can you do?` and pick a number from the list.",
        ))
    }
}
