//! Configuration of the message bus, parsable from CLI arguments or JSON.
//!
use crate::CourierError;
use clap::Args;
use serde::{Deserialize, Serialize};

/// Maximum number of buffered messages moved to the delivery queue per flush.
pub const ONE_STEP: usize = 100;

/// Default delay between arming the flush timer and flushing, in milliseconds.
///
/// Zero means the flush happens on the next tick of the runtime.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 0;

/// Default timeout of synchronous calls, in milliseconds. Zero waits forever.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 0;

#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of buffered messages flushed per pass.
    #[clap(long, default_value_t = ONE_STEP)]
    pub one_step: usize,
    /// Delay between arming the flush timer and flushing, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_FLUSH_INTERVAL_MS)]
    pub flush_interval_ms: u64,
    /// Timeout used by synchronous calls that do not specify one.
    #[clap(long, default_value_t = DEFAULT_SEND_TIMEOUT_MS)]
    pub default_send_timeout_ms: u64,
    /// Whether routed messages are shadowed onto the debug channel.
    #[clap(long = "no-debug-channel", action = clap::ArgAction::SetFalse)]
    pub debug_channel: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            one_step: ONE_STEP,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            default_send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            debug_channel: true,
        }
    }
}

impl BusConfig {
    /// Parse a configuration from a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, CourierError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Check the configuration, returning it unchanged if it is usable.
    pub fn validate(self) -> Result<Self, CourierError> {
        if self.one_step == 0 {
            return Err(CourierError::InvalidConfig(
                "one_step must be at least 1.".to_owned(),
            ));
        }

        Ok(self)
    }

    /// The flush delay as a [`tokio::time::Duration`].
    pub fn flush_interval(&self) -> tokio::time::Duration {
        tokio::time::Duration::from_millis(self.flush_interval_ms)
    }

    /// The default timeout for synchronous calls, if any.
    pub fn default_send_timeout(&self) -> Option<tokio::time::Duration> {
        (self.default_send_timeout_ms > 0)
            .then(|| tokio::time::Duration::from_millis(self.default_send_timeout_ms))
    }
}
