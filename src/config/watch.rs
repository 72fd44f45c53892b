//! Watch subsystem configuration
//!
//! ```toml
//! [watch]
//! watcher_buffer_size = 64
//! establish_timeout_ms = 3000
//! max_reconnect_attempts = 3
//! ```

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Watch multiplexing, delivery and reconnect parameters
///
/// # Examples
///
/// ```rust
/// use etcd3_client::WatchConfig;
///
/// let config = WatchConfig {
///     max_reconnect_attempts: 5,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each watch's delivery queue, counted in responses
    ///
    /// A consumer that stops pulling while this many responses are queued is cut
    /// off with `WatchError::SlowConsumer` instead of stalling the shared stream.
    ///
    /// **Default**: 64
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,

    /// Deadline for opening a stream and receiving the first create acknowledgement
    ///
    /// Exceeding it on a fresh manager fails the pending watch with `WatchTimedOut`;
    /// exceeding it during a reconnect moves the manager to `Failed`.
    ///
    /// **Default**: 3000
    #[serde(default = "default_establish_timeout_ms")]
    pub establish_timeout_ms: u64,

    /// Number of stream re-open attempts before giving up
    ///
    /// **Default**: 3
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay before the second reconnect attempt; the first one is immediate
    ///
    /// **Default**: 50
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Upper bound of the exponential reconnect backoff
    ///
    /// **Default**: 1000
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// How long a canceled watch waits for the server's cancel confirmation
    /// before it is dropped locally anyway
    ///
    /// **Default**: 1000
    #[serde(default = "default_cancel_grace_period_ms")]
    pub cancel_grace_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watcher_buffer_size: default_watcher_buffer_size(),
            establish_timeout_ms: default_establish_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            cancel_grace_period_ms: default_cancel_grace_period_ms(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.watcher_buffer_size must be greater than 0".into(),
            )));
        }

        if self.establish_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.establish_timeout_ms must be greater than 0".into(),
            )));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.max_reconnect_attempts must be at least 1".into(),
            )));
        }

        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "watch.reconnect_base_delay_ms ({}) exceeds reconnect_max_delay_ms ({})",
                self.reconnect_base_delay_ms, self.reconnect_max_delay_ms
            ))));
        }

        if self.cancel_grace_period_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.cancel_grace_period_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn establish_timeout(&self) -> Duration {
        Duration::from_millis(self.establish_timeout_ms)
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_period_ms)
    }

    /// Backoff before reconnect attempt `attempt` (0-based), without jitter
    pub(crate) fn reconnect_delay(
        &self,
        attempt: u32,
    ) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self.reconnect_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.reconnect_max_delay_ms))
    }
}

fn default_watcher_buffer_size() -> usize {
    64
}
fn default_establish_timeout_ms() -> u64 {
    3000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_base_delay_ms() -> u64 {
    50
}
fn default_reconnect_max_delay_ms() -> u64 {
    1000
}
fn default_cancel_grace_period_ms() -> u64 {
    1000
}
