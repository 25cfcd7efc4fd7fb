//! Plugins bundled with the binary, selectable by name in configuration.
//!
//! | name      | behavior                                              |
//! |-----------|-------------------------------------------------------|
//! | `ping`    | answers `ping` with `pong`; `POST /slack/ping` route  |
//! | `whoami`  | tells users who and where they are                    |
//! | `catalog` | the numbered menu over the other enabled plugins      |

use std::sync::Arc;

use crate::config::ConfigError;
use crate::menu::{MenuOption, MenuOptions};
use crate::plugins::{Plugin, Plugins};

pub mod catalog;
pub mod ping;
pub mod whoami;

pub use catalog::Catalog;
pub use ping::Ping;
pub use whoami::Whoami;

/// Names accepted by [`resolve`].
pub const BUILTIN_NAMES: &[&str] = &[catalog::NAME, ping::NAME, whoami::NAME];

/// Build the plugin list for `names`, keeping their order.
///
/// The catalog menu lists the other named plugins that can appear in a
/// menu, in the same order.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownPlugin`] for a name that is not built in.
pub fn resolve(names: &[String]) -> Result<Plugins, ConfigError> {
    let options: Vec<Arc<dyn MenuOption>> =
        names.iter().filter_map(|name| menu_option(name)).collect();
    let options = MenuOptions::from(options);

    let plugins = names
        .iter()
        .map(|name| -> Result<Arc<dyn Plugin>, ConfigError> {
            match name.as_str() {
                ping::NAME => Ok(Arc::new(Ping)),
                whoami::NAME => Ok(Arc::new(Whoami)),
                catalog::NAME => Ok(Arc::new(Catalog::new(options.clone()))),
                other => Err(ConfigError::UnknownPlugin(other.to_owned())),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Plugins::from(plugins))
}

fn menu_option(name: &str) -> Option<Arc<dyn MenuOption>> {
    match name {
        ping::NAME => Some(Arc::new(Ping)),
        whoami::NAME => Some(Arc::new(Whoami)),
        _ => None,
    }
}
