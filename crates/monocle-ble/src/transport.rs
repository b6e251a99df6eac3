//! btleplug implementation of the Monocle transport capability

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, WriteType};
use futures::stream::StreamExt;
use monocle_core::{
    DeviceFilter, Transport, TransportEvent, TransportEvents, TransportResult, WriteKind,
};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::device::MonocleDevice;
use crate::discovery::BleDiscovery;
use crate::error::BleTransportError;

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// Transport backed by the platform BLE stack through btleplug
pub struct BtleTransport {
    config: BleTransportConfig,
    discovery: Mutex<BleDiscovery>,
    device: RwLock<Option<MonocleDevice>>,
    connected: Arc<AtomicBool>,
    cancel: Notify,
    /// Notification pump and disconnect watcher of the live connection
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for BtleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BtleTransport {
    pub fn new() -> Self {
        Self::with_config(BleTransportConfig::default())
    }

    pub fn with_config(config: BleTransportConfig) -> Self {
        Self {
            discovery: Mutex::new(BleDiscovery::new(config.clone())),
            config,
            device: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    /// Clone of the selected device
    async fn selected(&self) -> Result<MonocleDevice, BleTransportError> {
        self.device
            .read()
            .await
            .clone()
            .ok_or(BleTransportError::NoDeviceSelected)
    }

    /// Selected device, failing unless the link is up
    async fn connected_device(&self) -> Result<MonocleDevice, BleTransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BleTransportError::NotConnected);
        }
        self.selected().await
    }

    async fn set_state(&self, update: impl FnOnce(&mut MonocleDevice)) {
        if let Some(device) = self.device.write().await.as_mut() {
            update(device);
        }
    }

    async fn stop_tasks(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn open(&self) -> Result<TransportEvents, BleTransportError> {
        let device = self.selected().await?;
        let peripheral = device.peripheral.clone();
        self.set_state(MonocleDevice::mark_connecting).await;

        match timeout(self.config.connection_timeout(), peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_state(MonocleDevice::mark_failed).await;
                return Err(BleTransportError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                self.set_state(MonocleDevice::mark_failed).await;
                return Err(BleTransportError::ConnectionTimeout);
            }
        }

        if let Err(e) = peripheral.discover_services().await {
            error!("Failed to discover services on {}: {}", device.name(), e);
            self.set_state(MonocleDevice::mark_failed).await;
            let _ = peripheral.disconnect().await;
            return Err(BleTransportError::ConnectionFailed(e.to_string()));
        }

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| BleTransportError::NotificationStreamFailed(e.to_string()))?;
        let adapter = self.discovery.lock().await.initialize_adapter().await?;
        let mut adapter_events = adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

        self.stop_tasks().await;
        let (tx, rx) = mpsc::unbounded_channel();

        let notification_tx = tx.clone();
        let name = device.name().to_string();
        let pump = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                let event = TransportEvent::Notification {
                    characteristic: data.uuid,
                    value: data.value,
                };
                if notification_tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Notification stream for {} ended", name);
        });

        let connected = Arc::clone(&self.connected);
        let peripheral_id = device.peripheral_id();
        let name = device.name().to_string();
        let watcher = tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        connected.store(false, Ordering::SeqCst);
                        info!("{} disconnected", name);
                        let _ = tx.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        self.tasks.lock().await.extend([pump, watcher]);
        self.set_state(MonocleDevice::mark_connected).await;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to {}", device.name());
        Ok(rx)
    }

    async fn close(&self) -> Result<(), BleTransportError> {
        self.stop_tasks().await;
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let device = match self.selected().await {
            Ok(device) => device,
            Err(_) => return Ok(()),
        };
        self.set_state(MonocleDevice::mark_disconnected).await;

        if was_connected {
            device
                .peripheral
                .disconnect()
                .await
                .map_err(|e| BleTransportError::ConnectionFailed(e.to_string()))?;
            info!("Disconnected from {}", device.name());
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn request_device(&self, filter: &DeviceFilter) -> TransportResult<String> {
        let device = self
            .discovery
            .lock()
            .await
            .find_device(filter, &self.cancel)
            .await?;
        let name = device.name().to_string();
        info!("Selected {}", name);
        *self.device.write().await = Some(device);
        Ok(name)
    }

    fn cancel_request(&self) {
        self.cancel.notify_waiters();
    }

    async fn connect(&self) -> TransportResult<TransportEvents> {
        Ok(self.open().await?)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if let Err(e) = self.close().await {
            warn!("Disconnect failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn primary_service(&self, service: Uuid) -> TransportResult<()> {
        let device = self.connected_device().await?;
        if device.has_service(service) {
            Ok(())
        } else {
            Err(BleTransportError::ServiceNotFound { uuid: service }.into())
        }
    }

    async fn characteristic(&self, service: Uuid, characteristic: Uuid) -> TransportResult<()> {
        let device = self.connected_device().await?;
        device.characteristic(Some(service), characteristic)?;
        Ok(())
    }

    async fn start_notifications(&self, characteristic: Uuid) -> TransportResult<()> {
        let device = self.connected_device().await?;
        let target = device.characteristic(None, characteristic)?;
        device
            .peripheral
            .subscribe(&target)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;
        debug!("Subscribed to {}", characteristic);
        Ok(())
    }

    async fn write(
        &self,
        characteristic: Uuid,
        bytes: &[u8],
        kind: WriteKind,
    ) -> TransportResult<()> {
        let device = self.connected_device().await?;
        let target = device.characteristic(None, characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        device
            .peripheral
            .write(&target, bytes, write_type)
            .await
            .map_err(BleTransportError::from_write_error)?;
        Ok(())
    }
}
