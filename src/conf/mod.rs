//! Provides application configuration options.

pub mod backend;
pub mod ice;
pub mod server;
pub mod whip;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

pub use self::{
    backend::Backend,
    ice::{Ice, IceServer},
    server::Server,
    whip::Whip,
};

/// Name of environment variable which points to a config file.
pub const APP_CONF_PATH_ENV_VAR_NAME: &str = "WHIP_CONF";

/// Prefix of environment variables which override config options.
const APP_CONF_ENV_PREFIX: &str = "WHIP";

/// CLI application settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// HTTP server settings.
    pub server: Server,

    /// WHIP protocol surface settings.
    pub whip: Whip,

    /// Media backend connection settings.
    pub backend: Backend,

    /// STUN/TURN servers advertised to publishing clients.
    pub ice: Ice,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from the following sources
    /// (in the following order):
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if a config file is present but unreadable, or if some config
    /// value has a wrong format.
    pub fn parse() -> Result<Self, config::ConfigError> {
        let mut cfg = Config::new();

        if let Ok(path) = std::env::var(APP_CONF_PATH_ENV_VAR_NAME) {
            cfg.merge(File::with_name(&path))?;
        } else {
            cfg.merge(File::with_name("config").required(false))?;
        }
        cfg.merge(
            Environment::with_prefix(APP_CONF_ENV_PREFIX).separator("__"),
        )?;

        cfg.try_into()
    }
}
