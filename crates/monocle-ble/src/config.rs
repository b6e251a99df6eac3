//! BLE transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the btleplug transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// Maximum time a device request scans before giving up
    pub scan_timeout_ms: u64,
    /// Maximum time to wait for the GATT connection
    pub connection_timeout_ms: u64,
    /// Only accept devices whose advertised name starts with this
    pub device_name_prefix: Option<String>,
    /// Which local adapter to use when several are present
    pub adapter_index: usize,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connection_timeout_ms: 5_000,
            device_name_prefix: None,
            adapter_index: 0,
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set device name prefix
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_name_prefix = Some(prefix.into());
        self
    }

    /// Select the adapter by position
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}
