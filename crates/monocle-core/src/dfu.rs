//! Hooks handed to a firmware update implementation
//!
//! Packet framing of the Nordic DFU protocol lives outside this crate. When a
//! device comes up in bootloader mode the session builds a [`DfuLink`] and
//! passes it to the injected [`FirmwareUpdater`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::protocol::{DFU_CONTROL_CHARACTERISTIC_UUID, DFU_PACKET_CHARACTERISTIC_UUID};
use crate::status::StatusSink;
use crate::transport::{Transport, WriteKind};

// ----------------------------------------------------------------------------
// Firmware Updater Trait
// ----------------------------------------------------------------------------

/// Firmware update collaborator
#[async_trait]
pub trait FirmwareUpdater: Send + Sync {
    /// Run a complete update over the given link
    async fn update(&self, link: &mut DfuLink) -> Result<()>;
}

// ----------------------------------------------------------------------------
// DFU Link
// ----------------------------------------------------------------------------

/// Control/packet characteristic access for one DFU session
pub struct DfuLink {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn StatusSink>,
    control_responses: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl DfuLink {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn StatusSink>,
        control_responses: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            transport,
            sink,
            control_responses,
        }
    }

    /// Write to the control point (with response)
    pub async fn transmit_control_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.transport
            .write(DFU_CONTROL_CHARACTERISTIC_UUID, bytes, WriteKind::WithResponse)
            .await?;
        Ok(())
    }

    /// Write to the packet characteristic (without response)
    pub async fn transmit_packet_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.transport
            .write(DFU_PACKET_CHARACTERISTIC_UUID, bytes, WriteKind::WithoutResponse)
            .await?;
        Ok(())
    }

    /// Next control point notification; `None` once the connection is gone
    pub async fn receive_control_response(&mut self) -> Option<Vec<u8>> {
        self.control_responses.recv().await
    }

    /// Forward update progress to the status sink
    pub fn report_progress(&self, percent: f32) {
        self.sink.progress(percent);
    }
}
