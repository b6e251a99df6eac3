//! Selected device and its connection state

use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::{Peripheral, PeripheralId};
use uuid::Uuid;

use crate::error::BleTransportError;

// ----------------------------------------------------------------------------
// Device State
// ----------------------------------------------------------------------------

/// Connection state of the selected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// A device picked by a device request
#[derive(Debug, Clone)]
pub struct MonocleDevice {
    pub peripheral: Peripheral,
    name: String,
    pub connection_state: ConnectionState,
}

impl MonocleDevice {
    pub fn new(peripheral: Peripheral, local_name: Option<String>) -> Self {
        let name = local_name.unwrap_or_else(|| format!("{:?}", peripheral.id()));
        Self {
            peripheral,
            name,
            connection_state: ConnectionState::Disconnected,
        }
    }

    /// Advertised name, or the platform id when the device has none
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn mark_connecting(&mut self) {
        self.connection_state = ConnectionState::Connecting;
    }

    pub fn mark_connected(&mut self) {
        self.connection_state = ConnectionState::Connected;
    }

    pub fn mark_failed(&mut self) {
        self.connection_state = ConnectionState::Failed;
    }

    pub fn mark_disconnected(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
    }

    /// Whether service discovery found `service`
    pub fn has_service(&self, service: Uuid) -> bool {
        self.peripheral
            .services()
            .iter()
            .any(|candidate| candidate.uuid == service)
    }

    /// Look up a characteristic, optionally restricted to one service
    pub fn characteristic(
        &self,
        service: Option<Uuid>,
        uuid: Uuid,
    ) -> Result<Characteristic, BleTransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && service.map_or(true, |s| c.service_uuid == s))
            .ok_or(BleTransportError::CharacteristicNotFound { uuid })
    }
}
