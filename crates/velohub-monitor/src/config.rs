//! Tunables for the broadcast service.

use std::time::Duration;

use serde::Deserialize;

use crate::error::MonitorError;

/// Number of envelopes retained for reconnection replay.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Interval between keep-alive frames on an idle connection.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Monitor settings, usually read from the `[monitor]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    /// Maximum envelopes kept in the replay buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Seconds between heartbeat frames.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Rejects settings the dispatcher cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::ZeroCapacity` or `MonitorError::ZeroHeartbeat`.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.buffer_capacity == 0 {
            return Err(MonitorError::ZeroCapacity);
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(MonitorError::ZeroHeartbeat);
        }
        Ok(())
    }
}
