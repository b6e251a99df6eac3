//! Terminal status sink

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use monocle_core::{ConnectionStatus, MessageLevel, StatusSink, StatusUpdate};
use tracing::{debug, error, info};

/// Status sink writing device output to stdout and messages to the log.
///
/// Friendly REPL output is only echoed while `echo` is on, so one-shot
/// commands print nothing but their own result.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    echo: AtomicBool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::SeqCst);
    }

    pub fn is_echoing(&self) -> bool {
        self.echo.load(Ordering::SeqCst)
    }
}

impl StatusSink for ConsoleSink {
    fn output(&self, text: &str) {
        if !self.is_echoing() {
            debug!("Device output: {:?}", text);
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn status(&self, update: StatusUpdate) {
        let detail = update.detail.unwrap_or_default();
        match update.state {
            ConnectionStatus::Connected => info!("Connected {}", detail),
            ConnectionStatus::Disconnected => info!("Disconnected {}", detail),
            ConnectionStatus::Progress => debug!("Connecting {}", detail),
            ConnectionStatus::Updating => info!("Updating firmware {}", detail),
        }
    }

    fn progress(&self, percent: f32) {
        info!("Firmware update {:.0}%", percent);
    }

    fn message(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Info => info!("{}", text),
            MessageLevel::Error => error!("{}", text),
        }
    }

    fn raw_data(&self, data: &[u8]) {
        debug!("Raw data: {} bytes", data.len());
    }
}
