//! Link configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a GATT link
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkConfig {
    /// Maximum time an awaitable facade call waits for its operation to
    /// resolve before failing with a timeout
    pub response_timeout: Duration,
    /// Interval between polls of the adapter state during hang recovery
    pub recovery_poll_interval: Duration,
    /// Maximum number of recovery polls before giving up on the adapter
    pub recovery_max_polls: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            recovery_poll_interval: Duration::from_millis(300),
            recovery_max_polls: 8,
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with custom settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the awaitable-call response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the adapter recovery poll interval
    pub fn with_recovery_poll_interval(mut self, interval: Duration) -> Self {
        self.recovery_poll_interval = interval;
        self
    }

    /// Set the adapter recovery poll bound
    pub fn with_recovery_max_polls(mut self, polls: u32) -> Self {
        self.recovery_max_polls = polls;
        self
    }
}
