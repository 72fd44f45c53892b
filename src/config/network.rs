use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Network parameters shared by the unary channel and the watch stream
///
/// # Key Configuration Areas
/// - Connection establishment (TCP handshake timeout)
/// - Unary request lifecycle
/// - HTTP/2 keepalive, which is what detects a silently dead watch stream
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Maximum time to wait for establishing a TCP connection
    /// Default: 1000ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Deadline for unary RPCs. Not applied to the watch stream, which is long-lived.
    /// Default: 3000ms
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// TCP keepalive for idle connections
    /// Default: 300s
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// Interval for HTTP/2 keepalive pings
    /// Default: 30s
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// Timeout for HTTP/2 keepalive pings
    /// Default: 10s
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// Enable Gzip compression for network traffic
    /// Default: false (etcd servers do not advertise gzip)
    #[serde(default)]
    pub enable_compression: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keepalive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keepalive_timeout(),
            enable_compression: false,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "connect_timeout_in_ms must be greater than 0".into(),
            )));
        }

        if self.request_timeout_in_ms < self.connect_timeout_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "request_timeout_in_ms ({}) must not be shorter than connect_timeout_in_ms ({})",
                self.request_timeout_in_ms, self.connect_timeout_in_ms
            ))));
        }

        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "http2_keep_alive_timeout_in_secs ({}) must be less than the keepalive interval ({})",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            ))));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_in_secs)
    }

    pub fn http2_keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_interval_in_secs)
    }

    pub fn http2_keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_timeout_in_secs)
    }
}

fn default_connect_timeout() -> u64 {
    1000
}
fn default_request_timeout() -> u64 {
    3000
}
fn default_tcp_keepalive() -> u64 {
    300
}
fn default_h2_keepalive_interval() -> u64 {
    30
}
fn default_h2_keepalive_timeout() -> u64 {
    10
}
