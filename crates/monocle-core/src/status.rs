//! Status sink: the narrow interface through which the session talks to a UI

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Status Types
// ----------------------------------------------------------------------------

/// Connection state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Progress,
    Connected,
    Updating,
    Disconnected,
}

/// Structured status update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub state: ConnectionStatus,
    pub detail: Option<String>,
}

impl StatusUpdate {
    pub fn new(state: ConnectionStatus) -> Self {
        Self {
            state,
            detail: None,
        }
    }

    pub fn with_detail(state: ConnectionStatus, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: Some(detail.into()),
        }
    }
}

/// Severity of a modal message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Info,
    Error,
}

// ----------------------------------------------------------------------------
// Status Sink Trait
// ----------------------------------------------------------------------------

/// Receiver of everything the session wants a human to see.
///
/// Implementations must not block; they are called from the notification
/// pump.
pub trait StatusSink: Send + Sync {
    /// Device output meant for a terminal (friendly REPL echo)
    fn output(&self, text: &str);

    /// Connection state change
    fn status(&self, update: StatusUpdate);

    /// Firmware update progress in percent
    fn progress(&self, percent: f32);

    /// Informational or error message
    fn message(&self, level: MessageLevel, text: &str);

    /// Notification from the raw data service
    fn raw_data(&self, data: &[u8]) {
        tracing::debug!("Raw data received: {} bytes", data.len());
    }
}

/// Sink that only logs, for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn output(&self, text: &str) {
        tracing::info!("{}", text.trim_end());
    }

    fn status(&self, update: StatusUpdate) {
        tracing::info!("Status: {:?} {}", update.state, update.detail.unwrap_or_default());
    }

    fn progress(&self, percent: f32) {
        tracing::info!("Update progress: {:.2}%", percent);
    }

    fn message(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Info => tracing::info!("{}", text),
            MessageLevel::Error => tracing::error!("{}", text),
        }
    }
}
