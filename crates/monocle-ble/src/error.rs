//! Error types for the BLE transport

use monocle_core::TransportError;
use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the btleplug transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Failed to scan for devices: {0}")]
    ScanFailed(String),

    #[error("No matching device found within the scan timeout")]
    ScanTimeout,

    #[error("Device request cancelled")]
    ScanCancelled,

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Device not connected")]
    NotConnected,

    #[error("Service not found: {uuid}")]
    ServiceNotFound { uuid: Uuid },

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("GATT operation already in progress")]
    OperationInProgress,

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),
}

impl BleTransportError {
    /// Classify a failed write. The platform stacks report contention on
    /// the GATT queue only through the error text.
    pub fn from_write_error(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => BleTransportError::NotConnected,
            other => {
                let message = other.to_string();
                if message.to_lowercase().contains("in progress") {
                    BleTransportError::OperationInProgress
                } else {
                    BleTransportError::WriteFailed(message)
                }
            }
        }
    }
}

impl From<BleTransportError> for TransportError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::AdapterNotAvailable(_) => TransportError::Unavailable(err.to_string()),
            BleTransportError::ScanTimeout | BleTransportError::NoDeviceSelected => {
                TransportError::DeviceNotFound(err.to_string())
            }
            BleTransportError::ScanCancelled => TransportError::RequestCancelled,
            BleTransportError::NotConnected => TransportError::NotConnected,
            BleTransportError::OperationInProgress => TransportError::Busy,
            BleTransportError::ServiceNotFound { uuid } => TransportError::ServiceNotFound(uuid),
            BleTransportError::CharacteristicNotFound { uuid } => {
                TransportError::CharacteristicNotFound(uuid)
            }
            BleTransportError::SubscriptionFailed(message) => {
                TransportError::SubscriptionFailed(message)
            }
            BleTransportError::WriteFailed(message) => TransportError::WriteFailed(message),
            BleTransportError::ScanFailed(_)
            | BleTransportError::ConnectionFailed(_)
            | BleTransportError::ConnectionTimeout
            | BleTransportError::EventStreamFailed(_)
            | BleTransportError::NotificationStreamFailed(_) => TransportError::Io(err.to_string()),
        }
    }
}
