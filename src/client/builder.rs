use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::Client;
use crate::transport::GrpcTransport;
use crate::ClientConfig;
use crate::Result;
use crate::WatchConfig;

pub struct ClientBuilder {
    config: ClientConfig,
    endpoints: Vec<String>,
}

impl ClientBuilder {
    /// Create a new builder with default config and specified endpoints
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            config: ClientConfig::default(),
            endpoints,
        }
    }

    /// Start from a loaded configuration, endpoints included
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            config,
        }
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.network.connect_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.network.request_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable/disable gzip compression (default: disabled)
    pub fn enable_compression(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.network.enable_compression = enable;
        self
    }

    /// Replace the watch subsystem settings
    pub fn watch_config(
        mut self,
        watch: WatchConfig,
    ) -> Self {
        self.config.watch = watch;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`connect_timeout`](ClientBuilder::connect_timeout) or
    /// [`watch_config`](ClientBuilder::watch_config). The builder's endpoints
    /// are kept.
    ///
    /// # Example: Full Configuration
    /// ```no_run
    /// use etcd3_client::{ClientBuilder, ClientConfig, NetworkConfig};
    ///
    /// let custom_config = ClientConfig {
    ///     network: NetworkConfig {
    ///         connect_timeout_in_ms: 2000,
    ///         request_timeout_in_ms: 5000,
    ///         ..NetworkConfig::default()
    ///     },
    ///     ..ClientConfig::default()
    /// };
    ///
    /// let builder = ClientBuilder::new(vec!["http://node1:2379".into()])
    ///     .set_config(custom_config);
    /// ```
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration, connect and start the watch manager
    pub async fn build(self) -> Result<Client> {
        let config = ClientConfig {
            endpoints: self.endpoints,
            ..self.config
        }
        .validate()?;

        let transport = Arc::new(GrpcTransport::connect(&config.endpoints, &config.network).await?);
        debug!(endpoint = %transport.endpoint(), "client built");

        let endpoints = config.endpoints.clone();
        Ok(Client::from_parts(transport.clone(), transport, config, endpoints))
    }
}
