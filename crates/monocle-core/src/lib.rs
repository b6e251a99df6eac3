//! Monocle device protocol layer
//!
//! Drives a Monocle wearable over an abstract BLE [`Transport`]: connection
//! lifecycle, MTU-bounded outbound queues, the raw REPL state machine and the
//! file operations built on top of it.
//!
//! ## Architecture
//!
//! - [`transport`] - Capability the platform BLE stack provides
//! - [`queue`] - Outbound byte queue with single in-flight write
//! - [`repl`] - Raw REPL framing, response collection and reply parsing
//! - [`script`] - Device-side scripts for file operations
//! - [`session`] - [`DeviceSession`], tying everything together
//! - [`dfu`] - Hooks for an external firmware updater
//! - [`status`] - Callbacks towards a UI
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use monocle_core::{DeviceSession, TracingStatusSink, Transport};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> monocle_core::Result<()> {
//! let session = DeviceSession::builder(transport, Arc::new(TracingStatusSink)).build()?;
//!
//! session.ensure_connected().await?;
//! session.enter_raw_mode().await?;
//! let reply = session.send_command("1+1").await?;
//! session.exit_raw_mode().await?;
//!
//! let entries = session.list_dir("/").await?;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod dfu;
pub mod errors;
pub mod protocol;
pub mod queue;
pub mod repl;
pub mod script;
pub mod session;
pub mod status;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::SessionConfig;
pub use dfu::{DfuLink, FirmwareUpdater};
pub use errors::{MonocleError, Result, TransportError};
pub use protocol::DeviceService;
pub use queue::Channel;
pub use repl::{extract_error, extract_output, extract_payload, ReplMode};
pub use session::{
    BulkWriteReport, DeviceEntry, DeviceSession, LocalFile, SessionBuilder, SessionKind,
};
pub use status::{ConnectionStatus, MessageLevel, StatusSink, StatusUpdate, TracingStatusSink};
pub use transport::{
    DeviceFilter, Transport, TransportEvent, TransportEvents, TransportResult, WriteKind,
};
