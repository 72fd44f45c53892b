//! Configuration management for the etcd client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod network;
mod watch;

pub use network::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Prefix of environment variables overriding configuration values,
/// e.g. `ETCD__WATCH__ESTABLISH_TIMEOUT_MS=500`.
pub const ENV_PREFIX: &str = "ETCD";

/// Top-level client configuration
///
/// Merges three layers, later ones winning:
/// 1. Default values from code
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with the `ETCD__` prefix
#[derive(Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Bootstrap endpoints, e.g. `http://127.0.0.1:2379`
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Connection establishment and keepalive parameters
    #[serde(default)]
    pub network: NetworkConfig,

    /// Watch multiplexing, delivery and reconnect parameters
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Debug for ClientConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoints", &self.endpoints)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            network: NetworkConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

impl ClientConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call [`validate`](Self::validate) once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/client.toml");
    /// std::env::set_var("ETCD__WATCH__MAX_RECONNECT_ATTEMPTS", "5");
    /// let cfg = ClientConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(env_source()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file without validation.
    ///
    /// Environment variables are re-applied on top so they keep the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        if self.endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "at least one endpoint is required".into(),
            )));
        }
        if let Some(bad) = self.endpoints.iter().find(|e| e.trim().is_empty()) {
            return Err(Error::Config(ConfigError::Message(format!(
                "endpoint must not be blank: {bad:?}"
            ))));
        }
        self.network.validate()?;
        self.watch.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("endpoints")
}
