//! Error types for the Monocle protocol layer
//!
//! Two layers of errors exist: [`TransportError`] describes failures of the
//! injected BLE capability, and [`MonocleError`] describes failures of the
//! session built on top of it. Device-side failures (a traceback in a raw REPL
//! reply) are not errors at this level; file operations report them as a
//! `false` outcome plus a status-sink message.

use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Platform does not support the BLE transport: {0}")]
    Unavailable(String),

    #[error("GATT operation already in progress")]
    Busy,

    #[error("Device not connected")]
    NotConnected,

    #[error("Device selection cancelled")]
    RequestCancelled,

    #[error("No device found: {0}")]
    DeviceNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the same write may simply be retried on the next drain tick
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Busy)
    }

    /// Whether the failure came from the user dismissing device selection
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::RequestCancelled)
    }
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by [`DeviceSession`](crate::session::DeviceSession)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonocleError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No device found within {timeout_ms}ms")]
    DiscoveryTimeout { timeout_ms: u64 },

    #[error("Device exposes neither a REPL nor a firmware update service")]
    NoUsableService,

    #[error("Device not connected")]
    NotConnected,

    #[error("Device disconnected while waiting for a response")]
    Disconnected,

    #[error("A raw REPL command is already awaiting its response")]
    CommandPending,

    #[error("File too large: {size} bytes (max: {max_size})")]
    FileTooLarge { size: usize, max_size: usize },

    #[error("Firmware update failed: {0}")]
    Dfu(String),

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type Result<T> = core::result::Result<T, MonocleError>;
