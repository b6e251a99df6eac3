//! Transport capability consumed by the session
//!
//! The session never touches a BLE stack directly. Everything it needs from
//! the platform (device selection, GATT connect, service lookup, notifications
//! and writes) goes through [`Transport`], so a `btleplug` backend and an
//! in-memory simulated device are interchangeable.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::TransportError;
use crate::protocol::{DFU_SERVICE_UUID, RAW_DATA_SERVICE_UUID, REPL_SERVICE_UUID};

pub type TransportResult<T> = core::result::Result<T, TransportError>;

/// Stream of events for one GATT connection
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// BLE device capability injected into a [`DeviceSession`](crate::session::DeviceSession)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Select a device advertising one of the filter's services.
    /// Returns a human-readable device name.
    async fn request_device(&self, filter: &DeviceFilter) -> TransportResult<String>;

    /// Abort an in-flight [`request_device`](Transport::request_device)
    fn cancel_request(&self);

    /// Open the GATT session with the selected device. Every call returns a
    /// fresh event stream that ends when the connection is gone.
    async fn connect(&self) -> TransportResult<TransportEvents>;

    /// Close the GATT session
    async fn disconnect(&self) -> TransportResult<()>;

    /// Whether the GATT session is currently open
    fn is_connected(&self) -> bool;

    /// Resolve a primary service; `ServiceNotFound` when absent
    async fn primary_service(&self, service: Uuid) -> TransportResult<()>;

    /// Resolve a characteristic of a resolved service
    async fn characteristic(&self, service: Uuid, characteristic: Uuid) -> TransportResult<()>;

    /// Subscribe to value-changed notifications of a characteristic
    async fn start_notifications(&self, characteristic: Uuid) -> TransportResult<()>;

    /// Write a value to a characteristic
    async fn write(&self, characteristic: Uuid, bytes: &[u8], kind: WriteKind)
        -> TransportResult<()>;
}

// ----------------------------------------------------------------------------
// Transport Types
// ----------------------------------------------------------------------------

/// GATT write flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Events emitted by a live GATT connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A subscribed characteristic changed value
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The device dropped the connection
    Disconnected,
}

/// Device selection filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// A device matches when it advertises any of these
    pub services: Vec<Uuid>,
    /// Services accessed after connecting but not required for a match
    pub optional_services: Vec<Uuid>,
}

impl DeviceFilter {
    /// Filter for a Monocle: REPL or DFU advertised, raw data optional
    pub fn monocle() -> Self {
        Self {
            services: vec![REPL_SERVICE_UUID, DFU_SERVICE_UUID],
            optional_services: vec![RAW_DATA_SERVICE_UUID],
        }
    }

    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        advertised.iter().any(|uuid| self.services.contains(uuid))
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::monocle()
    }
}
