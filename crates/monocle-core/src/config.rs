//! Session configuration
//!
//! All timing and sizing constants of the device protocol live here so tests
//! can shrink them and the CLI can load them from a config file.

use core::time::Duration;

use crate::errors::{MonocleError, Result};

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Timing and sizing parameters for a [`DeviceSession`](crate::session::DeviceSession)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest chunk written in one characteristic write. There is no MTU
    /// negotiation, so this stays at a conservative cross-platform value.
    pub mtu: usize,
    /// Period of the outbound queue drain task (milliseconds)
    pub drain_interval_ms: u64,
    /// How long a raw REPL command waits for its terminator (milliseconds)
    pub response_timeout_ms: u64,
    /// How long device selection may take before it is cancelled (milliseconds)
    pub discovery_timeout_ms: u64,
    /// Pause after a waiter obtains the raw channel (milliseconds)
    pub lock_poll_interval_ms: u64,
    /// Pause between entering raw mode and the first command (milliseconds)
    pub settle_delay_ms: u64,
    /// Largest file accepted for upload (bytes)
    pub file_write_max: usize,
    /// Raw bytes carried by one base64 file-write command
    pub transfer_chunk_size: usize,
    /// Delay before reconnecting after a firmware update (milliseconds)
    pub reconnect_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: 100,
            drain_interval_ms: 5,
            response_timeout_ms: 5_000,
            discovery_timeout_ms: 10_000,
            lock_poll_interval_ms: 10,
            settle_delay_ms: 10,
            file_write_max: 1_000_000,
            transfer_chunk_size: 1536,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the protocol defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum bytes per characteristic write
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the drain task period
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the raw REPL response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the device selection timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the post-acquire pause and the settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self.lock_poll_interval_ms = delay.as_millis() as u64;
        self
    }

    /// Set the upload ceiling
    pub fn with_file_write_max(mut self, max: usize) -> Self {
        self.file_write_max = max;
        self
    }

    /// Set the raw bytes carried per file-write command
    pub fn with_transfer_chunk_size(mut self, size: usize) -> Self {
        self.transfer_chunk_size = size;
        self
    }

    /// Set the reconnect delay after a firmware update
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Reject values that would stall the queue or the transfer loop
    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 {
            return Err(invalid("mtu must be greater than 0"));
        }
        if self.drain_interval_ms == 0 {
            return Err(invalid("drain interval must be greater than 0"));
        }
        if self.response_timeout_ms == 0 {
            return Err(invalid("response timeout must be greater than 0"));
        }
        if self.transfer_chunk_size == 0 {
            return Err(invalid("transfer chunk size must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> MonocleError {
    MonocleError::InvalidConfiguration {
        reason: reason.to_string(),
    }
}
