//! Adapter setup and device scanning

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use monocle_core::DeviceFilter;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::device::MonocleDevice;
use crate::error::BleTransportError;

// ----------------------------------------------------------------------------
// Advertisement Matching
// ----------------------------------------------------------------------------

/// Whether an advertisement belongs to a device we may select
pub fn advertisement_matches(
    filter: &DeviceFilter,
    name_prefix: Option<&str>,
    name: Option<&str>,
    services: &[Uuid],
) -> bool {
    if !filter.matches(services) {
        return false;
    }
    match name_prefix {
        Some(prefix) => name.is_some_and(|name| name.starts_with(prefix)),
        None => true,
    }
}

// ----------------------------------------------------------------------------
// Discovery Implementation
// ----------------------------------------------------------------------------

/// Handles adapter selection and scanning
pub struct BleDiscovery {
    config: BleTransportConfig,
    adapter: Option<Adapter>,
}

impl BleDiscovery {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            adapter: None,
        }
    }

    /// Initialize the configured adapter; a no-op once done
    pub async fn initialize_adapter(&mut self) -> Result<Adapter, BleTransportError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;

        let adapter = adapters
            .get(self.config.adapter_index)
            .cloned()
            .ok_or_else(|| {
                BleTransportError::AdapterNotAvailable(format!(
                    "{} adapter(s) present, index {} requested",
                    adapters.len(),
                    self.config.adapter_index
                ))
            })?;

        info!("BLE adapter initialized");
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Scan until a device matching `filter` shows up, the scan times out or
    /// `cancel` fires
    pub async fn find_device(
        &mut self,
        filter: &DeviceFilter,
        cancel: &Notify,
    ) -> Result<MonocleDevice, BleTransportError> {
        let adapter = self.initialize_adapter().await?;

        let mut events = adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

        adapter
            .start_scan(ScanFilter {
                services: filter.services.clone(),
            })
            .await
            .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;
        info!("Scanning for Monocle devices");

        let search = async {
            // Devices the platform already knows about come first
            if let Ok(known) = adapter.peripherals().await {
                for peripheral in known {
                    if let Some(device) = self.inspect(filter, peripheral).await {
                        return Some(device);
                    }
                }
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };
                if let Ok(peripheral) = adapter.peripheral(&id).await {
                    if let Some(device) = self.inspect(filter, peripheral).await {
                        return Some(device);
                    }
                }
            }
            None
        };

        let outcome = tokio::select! {
            found = timeout(self.config.scan_timeout(), search) => match found {
                Ok(Some(device)) => Ok(device),
                Ok(None) => Err(BleTransportError::EventStreamFailed("event stream ended".to_string())),
                Err(_) => Err(BleTransportError::ScanTimeout),
            },
            _ = cancel.notified() => Err(BleTransportError::ScanCancelled),
        };

        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop BLE scan: {}", e);
        }
        outcome
    }

    async fn inspect(&self, filter: &DeviceFilter, peripheral: Peripheral) -> Option<MonocleDevice> {
        let properties = peripheral.properties().await.ok().flatten()?;
        let name = properties.local_name.as_deref();
        if !advertisement_matches(
            filter,
            self.config.device_name_prefix.as_deref(),
            name,
            &properties.services,
        ) {
            return None;
        }

        let device = MonocleDevice::new(peripheral, properties.local_name.clone());
        debug!("Discovered {}", device.name());
        Some(device)
    }
}
