//! Configuration loading.
//!
//! Loads `ribcage.toml` (or `--config`, or `$RIBCAGE_CONFIG_PATH`).
//! Environment variables are applied on top of the file.
//!
//! ```toml
//! debug = false
//! plugins = ["catalog", "ping", "whoami"]   # or a single name: plugins = "ping"
//! auth_token = "xoxb-..."                  # falls back to $SLACK_API_TOKEN
//! listen_port = 3000                       # omit to run without an HTTP server
//!
//! [storage]
//! backend = "sqlite"                       # or "memory" (default)
//! path = "ribcage.db"
//!
//! [logging]
//! dir = "logs"                             # JSON log files; omit for stderr only
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::plugins::{builtin, Plugins};
use crate::storage::{MemoryStorage, SqliteStorage, Storage, StorageError};

/// Config file read when no path is given.
pub const DEFAULT_PATH: &str = "ribcage.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Neither the file nor `SLACK_API_TOKEN` supplied a token.
    #[error("no auth token: set auth_token or SLACK_API_TOKEN")]
    MissingToken,

    /// A plugin name is not built in.
    #[error("unknown plugin {0:?}")]
    UnknownPlugin(String),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Bot configuration. Immutable once loaded.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Verbose transport logging; raises the default log level to `debug`.
    pub debug: bool,
    /// Plugin names in initialization order.
    pub plugins: PluginList,
    /// Slack bot token.
    pub auth_token: Option<String>,
    /// Storage backend.
    pub storage: StorageConfig,
    /// HTTP server port. Absent means no server.
    pub listen_port: Option<u16>,
    /// Log sinks.
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug)
            .field("plugins", &self.plugins)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("storage", &self.storage)
            .field("listen_port", &self.listen_port)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Config {
    /// Load configuration with the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::load_with`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration using a custom env resolver.
    ///
    /// The file is `path`, else `$RIBCAGE_CONFIG_PATH`, else
    /// [`DEFAULT_PATH`]. Only a missing default file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env("RIBCAGE_CONFIG_PATH").map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::read(&path)?,
            None => match Self::read(Path::new(DEFAULT_PATH)) {
                Err(ConfigError::Read { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    info!("no config file found, using defaults");
                    Self::default()
                }
                other => other?,
            },
        };
        config.apply_overrides(env);
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loading config from file");
        Self::from_toml(&contents)
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML or unknown shapes.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Apply environment overrides.
    ///
    /// `SLACK_API_TOKEN` only fills a missing or empty `auth_token`.
    /// `RIBCAGE_DEBUG` and `RIBCAGE_LISTEN_PORT` replace file values.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.auth_token.as_deref().map_or(true, str::is_empty) {
            if let Some(token) = env("SLACK_API_TOKEN") {
                self.auth_token = Some(token);
            }
        }

        if let Some(v) = env("RIBCAGE_DEBUG") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.debug = true,
                "0" | "false" | "no" | "off" => self.debug = false,
                _ => warn!(var = "RIBCAGE_DEBUG", value = %v, "ignoring invalid env override"),
            }
        }

        if let Some(v) = env("RIBCAGE_LISTEN_PORT") {
            match v.trim().parse() {
                Ok(port) => self.listen_port = Some(port),
                Err(_) => {
                    warn!(var = "RIBCAGE_LISTEN_PORT", value = %v, "ignoring invalid env override");
                }
            }
        }
    }

    /// The auth token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if no non-empty token is set.
    pub fn auth_token(&self) -> Result<&str, ConfigError> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    /// Instantiate the configured plugins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlugin`] for a name that is not built in.
    pub fn resolve_plugins(&self) -> Result<Plugins, ConfigError> {
        builtin::resolve(self.plugins.names())
    }

    /// Default log level: `debug` when `debug = true`, else `info`.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Plugin names. Accepts a single string or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct PluginList(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for PluginList {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(name) => Self(vec![name]),
            OneOrMany::Many(names) => Self(names),
        }
    }
}

impl PluginList {
    /// Names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for PluginList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Storage backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local storage.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite {
        /// Database file, created if missing.
        path: PathBuf,
    },
}

impl StorageConfig {
    /// Open the selected backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened.
    pub async fn open(&self) -> Result<Arc<dyn Storage>, StorageError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStorage::default()),
            Self::Sqlite { path } => Arc::new(SqliteStorage::open(path).await?),
        })
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs. Absent means stderr only.
    pub dir: Option<PathBuf>,
}
