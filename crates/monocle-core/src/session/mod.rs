//! Device session: connection lifecycle and outbound queue draining
//!
//! A [`DeviceSession`] owns everything that used to be process-wide state in
//! a Monocle host: the live connection, both outbound queues, the raw REPL
//! mode and its pending response, and the lock that serializes raw-mode users.
//! It is cheap to clone; clones share the same session.
//!
//! Raw REPL handling lives in `raw`, file operations in `files`.

mod files;
mod raw;

pub use files::{BulkWriteReport, DeviceEntry, LocalFile};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::dfu::{DfuLink, FirmwareUpdater};
use crate::errors::{MonocleError, Result, TransportError};
use crate::protocol::{
    DeviceService, DFU_CONTROL_CHARACTERISTIC_UUID, DFU_PACKET_CHARACTERISTIC_UUID,
    FRIENDLY_PROMPT, RAW_DATA_RX_CHARACTERISTIC_UUID, RAW_DATA_SERVICE_UUID,
    RAW_DATA_TX_CHARACTERISTIC_UUID, REPL_RX_CHARACTERISTIC_UUID, REPL_TX_CHARACTERISTIC_UUID,
};
use crate::queue::{Channel, OutboundQueue, WriteSettlement};
use crate::repl::{ReplMode, ResponseCollector, Utf8Decoder};
use crate::status::{ConnectionStatus, MessageLevel, StatusSink, StatusUpdate};
use crate::transport::{DeviceFilter, Transport, TransportEvent, TransportEvents, WriteKind};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Primary session established by [`DeviceSession::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Device is in bootloader mode and exposes the DFU service
    FirmwareUpdate,
    /// Device runs the interpreter and exposes the REPL service
    Repl,
}

struct Connection {
    id: u64,
    kind: SessionKind,
    services: Vec<DeviceService>,
    pump_task: JoinHandle<()>,
    drain_tasks: Vec<JoinHandle<()>>,
}

struct PendingResponse {
    id: u64,
    tx: oneshot::Sender<Result<String>>,
}

#[derive(Default)]
struct SessionState {
    connection: Option<Connection>,
    repl_queue: OutboundQueue,
    raw_queue: OutboundQueue,
    mode: ReplMode,
    collector: ResponseCollector,
    decoder: Utf8Decoder,
    pending: Option<PendingResponse>,
    internal_operation: bool,
    dfu_control_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    dfu_control_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl SessionState {
    fn queue_mut(&mut self, channel: Channel) -> &mut OutboundQueue {
        match channel {
            Channel::Repl => &mut self.repl_queue,
            Channel::RawData => &mut self.raw_queue,
        }
    }

    fn register_pending(&mut self, id: u64) -> oneshot::Receiver<Result<String>> {
        let (tx, rx) = oneshot::channel();
        self.pending = Some(PendingResponse { id, tx });
        rx
    }

    fn fail_pending(&mut self, err: MonocleError) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.tx.send(Err(err));
        }
    }

    fn reset_raw_state(&mut self) {
        self.mode = ReplMode::Normal;
        self.collector.clear();
        self.decoder.reset();
    }
}

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn StatusSink>,
    updater: Option<Arc<dyn FirmwareUpdater>>,
    state: Mutex<SessionState>,
    /// Held by whoever owns the raw channel; FIFO-fair
    channel_lock: Arc<Mutex<()>>,
    connect_lock: Mutex<()>,
    connected: AtomicBool,
    next_id: AtomicU64,
}

// ----------------------------------------------------------------------------
// Session Builder
// ----------------------------------------------------------------------------

/// Builder for [`DeviceSession`]
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn StatusSink>,
    config: SessionConfig,
    updater: Option<Arc<dyn FirmwareUpdater>>,
}

impl SessionBuilder {
    /// Use custom timing and sizing
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Collaborator run when the device comes up in bootloader mode
    pub fn firmware_updater(mut self, updater: Arc<dyn FirmwareUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn build(self) -> Result<DeviceSession> {
        self.config.validate()?;
        Ok(DeviceSession {
            inner: Arc::new(SessionInner {
                config: self.config,
                transport: self.transport,
                sink: self.sink,
                updater: self.updater,
                state: Mutex::new(SessionState::default()),
                channel_lock: Arc::new(Mutex::new(())),
                connect_lock: Mutex::new(()),
                connected: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

// ----------------------------------------------------------------------------
// Device Session
// ----------------------------------------------------------------------------

/// Host-side session with one Monocle
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    /// Start building a session over `transport`, reporting to `sink`
    pub fn builder(transport: Arc<dyn Transport>, sink: Arc<dyn StatusSink>) -> SessionBuilder {
        SessionBuilder {
            transport,
            sink,
            config: SessionConfig::default(),
            updater: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Whether a GATT session is live
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && self.inner.transport.is_connected()
    }

    /// Current raw REPL mode
    pub async fn mode(&self) -> ReplMode {
        self.inner.state.lock().await.mode
    }

    /// Whether a background file operation owns the raw channel
    pub async fn is_internal_operation(&self) -> bool {
        self.inner.state.lock().await.internal_operation
    }

    /// Bytes waiting in an outbound queue
    pub async fn queued_bytes(&self, channel: Channel) -> usize {
        self.inner.state.lock().await.queue_mut(channel).len()
    }

    /// Services resolved on the live connection
    pub async fn services(&self) -> Vec<DeviceService> {
        self.inner
            .state
            .lock()
            .await
            .connection
            .as_ref()
            .map(|c| c.services.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Select a device, open the GATT session and resolve its services.
    /// An existing connection is disposed first.
    pub async fn connect(&self) -> Result<SessionKind> {
        let _connecting = self.inner.connect_lock.lock().await;

        if self.inner.state.lock().await.connection.is_some() {
            info!("Replacing existing connection");
            self.disconnect().await;
        }

        let transport = &self.inner.transport;
        let filter = DeviceFilter::monocle();
        let discovery = async {
            let name = transport.request_device(&filter).await?;
            info!("Selected device {}", name);
            transport.connect().await
        };

        let events = match timeout(self.inner.config.discovery_timeout(), discovery).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                match &e {
                    TransportError::Unavailable(_) => error!("{}", e),
                    _ => warn!("Failed to connect: {}", e),
                }
                return Err(e.into());
            }
            Err(_) => {
                transport.cancel_request();
                if transport.is_connected() {
                    let _ = transport.disconnect().await;
                }
                warn!(
                    "No device found within {}ms",
                    self.inner.config.discovery_timeout_ms
                );
                self.notify_disconnected();
                return Err(MonocleError::DiscoveryTimeout {
                    timeout_ms: self.inner.config.discovery_timeout_ms,
                });
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let session = self.clone();
        let pump_task = tokio::spawn(async move { session.pump_events(id, events).await });

        let (kind, services) = match self.resolve_session().await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Failed to set up device session: {}", e);
                pump_task.abort();
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };

        let mut drain_tasks = Vec::new();
        if kind == SessionKind::Repl {
            drain_tasks.push(self.spawn_drain(Channel::Repl));
        }
        if services.contains(&DeviceService::RawData) {
            drain_tasks.push(self.spawn_drain(Channel::RawData));
        }

        {
            let mut state = self.inner.state.lock().await;
            if kind == SessionKind::FirmwareUpdate {
                let (tx, rx) = mpsc::unbounded_channel();
                state.dfu_control_tx = Some(tx);
                state.dfu_control_rx = Some(rx);
            }
            state.connection = Some(Connection {
                id,
                kind,
                services: services.clone(),
                pump_task,
                drain_tasks,
            });
        }
        self.inner.connected.store(true, Ordering::SeqCst);

        // The pump ignores a loss reported before the connection was stored
        if !transport.is_connected() {
            warn!("Link lost while connecting");
            self.teardown(Some(id)).await;
            return Err(MonocleError::Disconnected);
        }

        info!("Connected: {:?} session, services {:?}", kind, services);
        Ok(kind)
    }

    /// Close the live session (if any) and report the disconnection
    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Connect when needed and bring the device to a usable state: a friendly
    /// prompt for a REPL session, a completed update for a DFU session.
    pub fn ensure_connected(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.is_connected() {
                return Ok(());
            }

            let sink = &self.inner.sink;
            sink.status(StatusUpdate::new(ConnectionStatus::Progress));

            match self.connect().await {
                Ok(SessionKind::Repl) => {
                    sink.status(StatusUpdate::new(ConnectionStatus::Connected));
                    self.enqueue(Channel::Repl, FRIENDLY_PROMPT.as_bytes()).await;
                    Ok(())
                }
                Ok(SessionKind::FirmwareUpdate) => self.run_firmware_update().await,
                Err(MonocleError::Transport(e)) if e.is_cancellation() => {
                    debug!("Device selection cancelled");
                    Ok(())
                }
                Err(e @ MonocleError::DiscoveryTimeout { .. }) => Err(e),
                Err(e) => {
                    sink.status(StatusUpdate::new(ConnectionStatus::Disconnected));
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Queue bytes on the raw data channel
    pub async fn send_raw_data(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match &state.connection {
            Some(connection) if connection.services.contains(&DeviceService::RawData) => {
                state.raw_queue.push(bytes);
                Ok(())
            }
            Some(_) => Err(TransportError::ServiceNotFound(RAW_DATA_SERVICE_UUID).into()),
            None => Err(MonocleError::NotConnected),
        }
    }

    async fn resolve_session(&self) -> Result<(SessionKind, Vec<DeviceService>)> {
        let transport = &self.inner.transport;

        let mut services = Vec::new();
        for service in [
            DeviceService::FirmwareUpdate,
            DeviceService::Repl,
            DeviceService::RawData,
        ] {
            if self.resolve_service(service).await {
                services.push(service);
            }
        }

        let kind = if services.contains(&DeviceService::FirmwareUpdate) {
            transport
                .start_notifications(DFU_CONTROL_CHARACTERISTIC_UUID)
                .await?;
            SessionKind::FirmwareUpdate
        } else if services.contains(&DeviceService::Repl) {
            transport
                .start_notifications(REPL_TX_CHARACTERISTIC_UUID)
                .await?;
            SessionKind::Repl
        } else {
            return Err(MonocleError::NoUsableService);
        };

        if services.contains(&DeviceService::RawData) {
            transport
                .start_notifications(RAW_DATA_TX_CHARACTERISTIC_UUID)
                .await?;
        }

        Ok((kind, services))
    }

    /// Absence of a service only disables its subsystem
    async fn resolve_service(&self, service: DeviceService) -> bool {
        let transport = &self.inner.transport;
        if let Err(e) = transport.primary_service(service.uuid()).await {
            debug!("{} service unavailable: {}", service, e);
            return false;
        }

        let characteristics = match service {
            DeviceService::FirmwareUpdate => {
                [DFU_CONTROL_CHARACTERISTIC_UUID, DFU_PACKET_CHARACTERISTIC_UUID]
            }
            _ => [service.rx_characteristic(), service.tx_characteristic()],
        };
        for characteristic in characteristics {
            if let Err(e) = transport
                .characteristic(service.uuid(), characteristic)
                .await
            {
                warn!("{} service incomplete: {}", service, e);
                return false;
            }
        }
        true
    }

    /// Tear down the connection. `origin` is the connection id when the
    /// transport reported the loss; stale reports are ignored.
    async fn teardown(&self, origin: Option<u64>) {
        let connection = {
            let mut state = self.inner.state.lock().await;
            let current = match (origin, &state.connection) {
                (Some(id), Some(connection)) => connection.id == id,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !current {
                return;
            }

            let connection = state.connection.take();
            state.repl_queue.clear();
            state.raw_queue.clear();
            state.fail_pending(MonocleError::Disconnected);
            state.reset_raw_state();
            state.dfu_control_tx = None;
            state.dfu_control_rx = None;
            connection
        };
        self.inner.connected.store(false, Ordering::SeqCst);

        if let Some(connection) = &connection {
            for task in &connection.drain_tasks {
                task.abort();
            }
        }

        if origin.is_none() {
            let transport = &self.inner.transport;
            if transport.is_connected() {
                if let Err(e) = transport.disconnect().await {
                    warn!("Failed to close GATT session: {}", e);
                }
            }
            if let Some(connection) = &connection {
                connection.pump_task.abort();
            }
        }

        match &connection {
            Some(connection) => info!("Disconnected ({:?} session)", connection.kind),
            None => debug!("Disconnect requested without a live session"),
        }
        self.notify_disconnected();
    }

    fn notify_disconnected(&self) {
        let sink = &self.inner.sink;
        sink.status(StatusUpdate::new(ConnectionStatus::Disconnected));
        sink.output("Disconnected\r\n");
    }

    // ------------------------------------------------------------------------
    // Notification Pump
    // ------------------------------------------------------------------------

    async fn pump_events(&self, id: u64, mut events: TransportEvents) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Notification {
                    characteristic,
                    value,
                } => self.handle_notification(characteristic, &value).await,
                TransportEvent::Disconnected => break,
            }
        }

        debug!("Event stream for connection {} ended", id);
        self.teardown(Some(id)).await;
    }

    async fn handle_notification(&self, characteristic: Uuid, value: &[u8]) {
        if characteristic == REPL_TX_CHARACTERISTIC_UUID {
            self.handle_repl_data(value).await;
        } else if characteristic == RAW_DATA_TX_CHARACTERISTIC_UUID {
            self.inner.sink.raw_data(value);
        } else if characteristic == DFU_CONTROL_CHARACTERISTIC_UUID {
            let state = self.inner.state.lock().await;
            if let Some(tx) = &state.dfu_control_tx {
                let _ = tx.send(value.to_vec());
            }
        } else {
            debug!("Ignoring notification from {}", characteristic);
        }
    }

    // ------------------------------------------------------------------------
    // Outbound Queues
    // ------------------------------------------------------------------------

    async fn enqueue(&self, channel: Channel, bytes: &[u8]) {
        self.inner.state.lock().await.queue_mut(channel).push(bytes);
    }

    fn spawn_drain(&self, channel: Channel) -> JoinHandle<()> {
        let session = self.clone();
        let period = self.inner.config.drain_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                session.drain_channel(channel).await;
            }
        })
    }

    /// One drain tick: write at most one MTU-sized prefix
    async fn drain_channel(&self, channel: Channel) {
        let write = {
            let mut state = self.inner.state.lock().await;
            match state.queue_mut(channel).begin_write(self.inner.config.mtu) {
                Some(write) => write,
                None => return,
            }
        };

        let characteristic = match channel {
            Channel::Repl => REPL_RX_CHARACTERISTIC_UUID,
            Channel::RawData => RAW_DATA_RX_CHARACTERISTIC_UUID,
        };
        let result = self
            .inner
            .transport
            .write(characteristic, &write.bytes, WriteKind::WithoutResponse)
            .await;

        let mut state = self.inner.state.lock().await;
        match state.queue_mut(channel).settle(&write, &result) {
            WriteSettlement::Sent => {
                debug!("{}: sent {} bytes", channel, write.bytes.len());
            }
            WriteSettlement::Retry => {
                debug!("{}: transport busy, retrying {} bytes", channel, write.bytes.len());
            }
            WriteSettlement::Discarded => {
                if let Err(e) = result {
                    warn!(
                        "{}: dropped {} bytes after write error: {}",
                        channel,
                        write.bytes.len(),
                        e
                    );
                    if channel == Channel::Repl {
                        state.fail_pending(MonocleError::Transport(e));
                    }
                }
            }
            WriteSettlement::Stale => {
                debug!("{}: queue cleared while a write was outstanding", channel);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Firmware Update
    // ------------------------------------------------------------------------

    async fn run_firmware_update(&self) -> Result<()> {
        let sink = &self.inner.sink;
        sink.status(StatusUpdate::with_detail(
            ConnectionStatus::Updating,
            "Updating firmware",
        ));

        let control_responses = self.inner.state.lock().await.dfu_control_rx.take();
        let result = match (&self.inner.updater, control_responses) {
            (Some(updater), Some(responses)) => {
                let mut link = DfuLink::new(
                    Arc::clone(&self.inner.transport),
                    Arc::clone(sink),
                    responses,
                );
                updater.update(&mut link).await
            }
            (None, _) => Err(MonocleError::Dfu(
                "device is in firmware update mode but no updater is configured".into(),
            )),
            (_, None) => Err(MonocleError::Dfu(
                "firmware update control channel unavailable".into(),
            )),
        };

        if let Err(e) = result {
            error!("Firmware update failed: {}", e);
            self.disconnect().await;
            sink.message(
                MessageLevel::Error,
                "Bluetooth error. Reconnect or check the logs for details",
            );
            return Err(e);
        }

        self.disconnect().await;
        sink.message(MessageLevel::Info, "Firmware update done");
        sink.status(StatusUpdate::new(ConnectionStatus::Progress));
        self.schedule_reconnect();
        Ok(())
    }

    /// The device reboots into the interpreter after an update
    fn schedule_reconnect(&self) {
        let session = self.clone();
        let delay = self.inner.config.reconnect_delay();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = session.ensure_connected().await {
                warn!("Reconnect after firmware update failed: {}", e);
            }
        });
    }
}
