//! Bluetooth Low Energy transport for driving a Monocle
//!
//! This crate implements the `Transport` trait from `monocle-core` on top of
//! btleplug, so a [`DeviceSession`](monocle_core::DeviceSession) can talk to a
//! real device from Linux, macOS or Windows.
//!
//! ## Architecture
//!
//! - [`config`] - Scan, connection and adapter settings
//! - [`error`] - BLE specific errors and their mapping onto transport errors
//! - [`discovery`] - Adapter selection and scanning for a Monocle
//! - [`device`] - The selected peripheral and its connection state
//! - [`transport`] - The `Transport` implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use monocle_ble::{BleTransportConfig, BtleTransport};
//! use monocle_core::{DeviceSession, TracingStatusSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleTransportConfig::new().with_device_name_prefix("monocle");
//! let transport = Arc::new(BtleTransport::with_config(config));
//!
//! let session = DeviceSession::builder(transport, Arc::new(TracingStatusSink)).build()?;
//! session.ensure_connected().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod transport;

// Public API exports
pub use config::BleTransportConfig;
pub use device::{ConnectionState, MonocleDevice};
pub use error::BleTransportError;
pub use transport::BtleTransport;

// Re-export Transport trait for convenience
pub use monocle_core::Transport;
