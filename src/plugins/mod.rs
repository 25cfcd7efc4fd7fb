//! Plugin capability interface and lifecycle coordination.
//!
//! A [`Plugin`] is initialized exactly once per process, after the first
//! successful connection, and registers its own listeners on the
//! [`Session`]. Plugins may also describe a help command through
//! [`PluginHelp`], which the help table turns into listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::help;
use crate::server::Server;
use crate::session::Session;
use crate::transport::{ConnectedIdentity, IncomingMessage};

pub mod builtin;

// ---------------------------------------------------------------------------
// Help metadata
// ---------------------------------------------------------------------------

/// Values available to dynamic help text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpContext {
    /// The bot's display name.
    pub bot_name: String,
    /// Team of the message that asked for help.
    pub team: Option<String>,
    /// Channel of the message that asked for help.
    pub channel: String,
    /// User who asked for help.
    pub user: String,
}

impl HelpContext {
    /// Build the context for a help request.
    pub fn from_message(bot_name: impl Into<String>, message: &IncomingMessage) -> Self {
        Self {
            bot_name: bot_name.into(),
            team: message.team.clone(),
            channel: message.channel.clone(),
            user: message.user.clone(),
        }
    }
}

/// Help text: fixed, or computed per request.
#[derive(Clone)]
pub enum HelpText {
    /// Sent verbatim.
    Static(String),
    /// Rendered from the requesting message's context.
    Dynamic(Arc<dyn Fn(&HelpContext) -> String + Send + Sync>),
}

impl HelpText {
    /// Wrap a closure as dynamic help text.
    pub fn dynamic(render: impl Fn(&HelpContext) -> String + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(render))
    }

    /// Produce the reply for `ctx`.
    pub fn render(&self, ctx: &HelpContext) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(render) => render(ctx),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Static(text) if text.is_empty())
    }
}

impl std::fmt::Debug for HelpText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for HelpText {
    fn from(text: &str) -> Self {
        Self::Static(text.to_owned())
    }
}

impl From<String> for HelpText {
    fn from(text: String) -> Self {
        Self::Static(text)
    }
}

/// Help metadata a plugin may declare. Either field may be missing.
#[derive(Debug, Clone, Default)]
pub struct PluginHelp {
    /// Command word users type after `help`.
    pub command: Option<String>,
    /// Reply for `help <command>`.
    pub text: Option<HelpText>,
}

impl PluginHelp {
    /// Complete help metadata.
    pub fn new(command: impl Into<String>, text: impl Into<HelpText>) -> Self {
        Self {
            command: Some(command.into()),
            text: Some(text.into()),
        }
    }

    /// The command and text, if both are present and non-empty.
    pub fn complete(&self) -> Option<(&str, &HelpText)> {
        let command = self.command.as_deref().filter(|c| !c.is_empty())?;
        let text = self.text.as_ref().filter(|t| !t.is_blank())?;
        Some((command, text))
    }
}

// ---------------------------------------------------------------------------
// Plugin trait
// ---------------------------------------------------------------------------

/// A behavior module hosted by the bot.
pub trait Plugin: Send + Sync {
    /// Short unique name used in configuration and logs.
    fn name(&self) -> &str;

    /// Register listeners. Called once, after the first successful connect.
    ///
    /// `server` is the HTTP server when one is configured.
    ///
    /// # Errors
    ///
    /// Errors are not isolated: they abort startup.
    fn init(
        &self,
        session: &Session,
        identity: &ConnectedIdentity,
        server: Option<&Server>,
    ) -> anyhow::Result<()>;

    /// Optional help metadata.
    fn help(&self) -> Option<PluginHelp> {
        None
    }
}

/// Ordered, immutable plugin list.
#[derive(Clone)]
pub struct Plugins(Arc<[Arc<dyn Plugin>]>);

impl Default for Plugins {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl Plugins {
    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no plugins are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plugins in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.0.iter()
    }

    /// Plugin names in configuration order.
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|p| p.name().to_owned()).collect()
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl From<Arc<dyn Plugin>> for Plugins {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        Self(Arc::from(vec![plugin]))
    }
}

impl From<Vec<Arc<dyn Plugin>>> for Plugins {
    fn from(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self(Arc::from(plugins))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Errors raised while initializing plugins.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// A plugin's `init` failed.
    #[error("plugin {plugin} failed to initialize: {reason:#}")]
    Plugin {
        /// Name of the failing plugin.
        plugin: String,
        /// What the plugin reported.
        reason: anyhow::Error,
    },

    /// A help listener pattern failed to compile.
    #[error("invalid listener pattern: {0}")]
    Listener(#[from] regex::Error),
}

/// Runs plugin initialization and help registration once per process.
#[derive(Debug)]
pub struct Coordinator {
    plugins: Plugins,
    initialized: AtomicBool,
}

impl Coordinator {
    /// Create a coordinator for `plugins`.
    pub fn new(plugins: Plugins) -> Self {
        Self {
            plugins,
            initialized: AtomicBool::new(false),
        }
    }

    /// The coordinated plugins.
    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Returns `true` once [`Coordinator::initialize_all`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize every plugin in order, then register help listeners.
    ///
    /// Returns `Ok(false)` without doing anything if initialization already
    /// happened, so reconnects never re-run plugin setup.
    ///
    /// # Errors
    ///
    /// Returns the first plugin failure; later plugins are not initialized.
    pub fn initialize_all(
        &self,
        session: &Session,
        identity: &ConnectedIdentity,
        server: Option<&Server>,
    ) -> Result<bool, InitError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("plugins already initialized");
            return Ok(false);
        }

        for plugin in self.plugins.iter() {
            debug!(plugin = plugin.name(), "initializing plugin");
            plugin
                .init(session, identity, server)
                .map_err(|reason| InitError::Plugin {
                    plugin: plugin.name().to_owned(),
                    reason,
                })?;
        }

        let listeners = help::build(session, &self.plugins, &identity.name)?;
        info!(
            plugins = self.plugins.len(),
            help_listeners = listeners,
            "plugins initialized"
        );
        Ok(true)
    }
}
