//! File and directory operations composed from raw REPL commands
//!
//! Each operation holds the session's channel lock for its whole duration,
//! marks itself as an internal operation, enters raw mode, runs one or more
//! scripts and leaves raw mode again. Mutating operations soft-reset the
//! device before releasing the channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::DeviceSession;
use crate::errors::{MonocleError, Result};
use crate::protocol::SOFT_RESET;
use crate::repl::{extract_error, extract_output, extract_payload, is_device_error};
use crate::script;
use crate::status::MessageLevel;

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

/// One record of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    /// `false` for directories
    pub file: bool,
}

/// A local file queued for a bulk upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path relative to the upload root, `/` or `\` separated
    pub relative_path: String,
    pub content: Vec<u8>,
}

impl LocalFile {
    pub fn new(relative_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }
}

/// Outcome of [`DeviceSession::bulk_write`], by device path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteReport {
    pub written: Vec<String>,
    pub failed: Vec<String>,
    /// Rejected before transfer for exceeding the size ceiling
    pub skipped: Vec<String>,
}

impl BulkWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// A reply counts as success when it is framed and carries no exception
fn succeeded(reply: &Option<String>) -> bool {
    match reply {
        Some(reply) => extract_payload(reply).is_some() && !is_device_error(reply),
        None => false,
    }
}

impl DeviceSession {
    // ------------------------------------------------------------------------
    // Channel Ownership
    // ------------------------------------------------------------------------

    /// Wait for the channel, mark the internal operation and enter raw mode.
    /// `None` when no device is connected.
    async fn acquire_internal(&self) -> Result<Option<OwnedMutexGuard<()>>> {
        if !self.is_connected() {
            warn!("Device operation skipped: not connected");
            return Ok(None);
        }

        let lock = Arc::clone(&self.inner.channel_lock);
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Waiting for the REPL channel");
                let guard = lock.lock_owned().await;
                sleep(self.inner.config.lock_poll_interval()).await;
                guard
            }
        };

        self.inner.state.lock().await.internal_operation = true;
        if let Err(e) = self.enter_raw_mode().await {
            self.inner.state.lock().await.internal_operation = false;
            return Err(e);
        }
        sleep(self.inner.config.settle_delay()).await;
        Ok(Some(guard))
    }

    async fn release_internal(&self, guard: OwnedMutexGuard<()>) {
        if let Err(e) = self.exit_raw_mode().await {
            warn!("Failed to leave raw REPL: {}", e);
        }
        self.inner.state.lock().await.internal_operation = false;
        drop(guard);
    }

    async fn soft_reset(&self) -> Result<()> {
        debug!("Soft reset");
        self.send_command(SOFT_RESET).await?;
        Ok(())
    }

    fn report_failure(&self, action: &str, reply: &Option<String>) {
        let detail = reply
            .as_deref()
            .and_then(extract_error)
            .map(str::trim)
            .filter(|detail| !detail.is_empty());
        let message = match detail {
            Some(detail) => format!("{} failed: {}", action, detail),
            None => format!("{} failed", action),
        };
        error!("{}", message);
        self.inner.sink.message(MessageLevel::Error, &message);
    }

    // ------------------------------------------------------------------------
    // Directory Operations
    // ------------------------------------------------------------------------

    /// List one directory level. Unparseable replies yield an empty list.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DeviceEntry>> {
        let Some(guard) = self.acquire_internal().await? else {
            return Ok(Vec::new());
        };
        let reply = self.send_command(&script::list_dir(path)).await;
        self.release_internal(guard).await;
        let reply = reply?;

        let parsed = reply
            .as_deref()
            .and_then(extract_payload)
            .map(|payload| serde_json::from_str::<Vec<DeviceEntry>>(payload.trim()));
        match parsed {
            Some(Ok(entries)) => {
                debug!("{} entries in {}", entries.len(), path);
                Ok(entries)
            }
            Some(Err(e)) => {
                warn!("Unreadable listing for {}: {}", path, e);
                self.report_failure(&format!("Listing {}", path), &reply);
                Ok(Vec::new())
            }
            None => {
                self.report_failure(&format!("Listing {}", path), &reply);
                Ok(Vec::new())
            }
        }
    }

    /// Create `path` and any missing ancestors
    pub async fn make_dir(&self, path: &str) -> Result<bool> {
        let Some(guard) = self.acquire_internal().await? else {
            return Ok(false);
        };
        let result = self.make_dir_locked(path).await;
        let reset = self.soft_reset().await;
        self.release_internal(guard).await;
        let created = result?;
        reset?;
        Ok(created)
    }

    async fn make_dir_locked(&self, path: &str) -> Result<bool> {
        let reply = self.send_command(&script::make_dir(path)).await?;
        if succeeded(&reply) {
            info!("Created directory {}", path);
            Ok(true)
        } else {
            self.report_failure(&format!("Creating {}", path), &reply);
            Ok(false)
        }
    }

    /// Rename or move a file or directory
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<bool> {
        let Some(guard) = self.acquire_internal().await? else {
            return Ok(false);
        };
        let reply = self.send_command(&script::rename(old_path, new_path)).await;
        let reset = self.soft_reset().await;
        self.release_internal(guard).await;
        let reply = reply?;
        reset?;

        if succeeded(&reply) {
            info!("Renamed {} to {}", old_path, new_path);
            Ok(true)
        } else {
            self.report_failure(&format!("Renaming {}", old_path), &reply);
            Ok(false)
        }
    }

    /// Remove a file or a directory tree. Entries that disappear while the
    /// tree is walked do not count as failures.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let Some(guard) = self.acquire_internal().await? else {
            return Ok(false);
        };
        let reply = self.send_command(&script::delete(path)).await;
        let reset = self.soft_reset().await;
        self.release_internal(guard).await;
        let reply = reply?;
        reset?;

        let deleted = match &reply {
            Some(text) => extract_payload(text).is_some_and(|payload| !payload.contains("failed")),
            None => false,
        };
        if deleted {
            info!("Deleted {}", path);
        } else {
            self.report_failure(&format!("Deleting {}", path), &reply);
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // File Transfer
    // ------------------------------------------------------------------------

    /// Write `content` to `path`, creating missing ancestors. Content above
    /// the size ceiling is rejected before anything is sent.
    pub async fn write_file(&self, content: &[u8], path: &str) -> Result<bool> {
        self.check_size(content, path)?;

        let Some(guard) = self.acquire_internal().await? else {
            return Ok(false);
        };
        let result = self.write_file_locked(content, path).await;
        let reset = self.soft_reset().await;
        self.release_internal(guard).await;
        let written = result?;
        reset?;
        Ok(written)
    }

    async fn write_file_locked(&self, content: &[u8], path: &str) -> Result<bool> {
        if let Some(parent) = script::parent_dir(path) {
            if !self.make_dir_locked(parent).await? {
                return Ok(false);
            }
        }
        self.transfer(content, path).await
    }

    /// Upload files below `root`, one at a time. A failing file is reported
    /// and the batch continues.
    pub async fn bulk_write(&self, files: &[LocalFile], root: &str) -> Result<BulkWriteReport> {
        let mut report = BulkWriteReport::default();
        let Some(guard) = self.acquire_internal().await? else {
            report.failed = files
                .iter()
                .map(|file| script::join_device_path(root, &file.relative_path))
                .collect();
            return Ok(report);
        };

        let result = self.bulk_write_locked(files, root, &mut report).await;
        let reset = self.soft_reset().await;
        self.release_internal(guard).await;
        result?;
        reset?;

        info!(
            "Bulk write: {} written, {} failed, {} skipped",
            report.written.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn bulk_write_locked(
        &self,
        files: &[LocalFile],
        root: &str,
        report: &mut BulkWriteReport,
    ) -> Result<()> {
        let root_dir = root.trim_end_matches('/');
        let mut helper_defined = false;

        for file in files {
            let path = script::join_device_path(root, &file.relative_path);
            if self.check_size(&file.content, &path).is_err() {
                report.skipped.push(path);
                continue;
            }

            if let Some(parent) = script::parent_dir(&path).filter(|parent| *parent != root_dir) {
                let command = if helper_defined {
                    script::call_make_dir(parent)
                } else {
                    script::make_dir_keep_helper(parent)
                };
                let reply = self.send_command(&command).await?;
                if !succeeded(&reply) {
                    self.report_failure(&format!("Creating {}", parent), &reply);
                    report.failed.push(path);
                    continue;
                }
                helper_defined = true;
            }

            if self.transfer(&file.content, &path).await? {
                report.written.push(path);
            } else {
                report.failed.push(path);
            }
        }

        if helper_defined {
            self.send_command(script::FORGET_HELPERS).await?;
        }
        Ok(())
    }

    fn check_size(&self, content: &[u8], path: &str) -> Result<()> {
        let max_size = self.inner.config.file_write_max;
        if content.len() > max_size {
            let message = format!(
                "File too large: {} is {} bytes, the limit is {}",
                path,
                content.len(),
                max_size
            );
            error!("{}", message);
            self.inner.sink.message(MessageLevel::Error, &message);
            return Err(MonocleError::FileTooLarge {
                size: content.len(),
                max_size,
            });
        }
        Ok(())
    }

    /// Send the content in base64 chunks. The channel must be held.
    async fn transfer(&self, content: &[u8], path: &str) -> Result<bool> {
        let action = format!("Writing {}", path);

        if content.is_empty() {
            let reply = self.send_command(&script::write_empty(path)).await?;
            if !succeeded(&reply) {
                self.report_failure(&action, &reply);
                return Ok(false);
            }
            info!("Wrote empty file {}", path);
            return Ok(true);
        }

        let reply = self.send_command(&script::open_for_write(path)).await?;
        if !succeeded(&reply) {
            self.report_failure(&action, &reply);
            return Ok(false);
        }

        for command in script::write_chunks(content, self.inner.config.transfer_chunk_size) {
            let reply = self.send_command(&command).await?;
            if !succeeded(&reply) {
                self.report_failure(&action, &reply);
                self.send_command(script::CLOSE_WRITE).await?;
                return Ok(false);
            }
        }

        let reply = self.send_command(script::CLOSE_WRITE).await?;
        if !succeeded(&reply) {
            self.report_failure(&action, &reply);
            return Ok(false);
        }
        info!("Wrote {} bytes to {}", content.len(), path);
        Ok(true)
    }

    /// Read a file back. `None` when the device reports an error or the
    /// reply cannot be decoded.
    pub async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(guard) = self.acquire_internal().await? else {
            return Ok(None);
        };
        let reply = self.send_command(&script::read_file(path)).await;
        self.release_internal(guard).await;
        let reply = reply?;

        let content = reply
            .as_deref()
            .filter(|reply| !is_device_error(reply))
            .and_then(extract_payload)
            .and_then(script::decode_read_payload);
        if content.is_none() {
            self.report_failure(&format!("Reading {}", path), &reply);
        }
        Ok(content)
    }

    // ------------------------------------------------------------------------
    // Interactive Use
    // ------------------------------------------------------------------------

    /// Forward terminal keystrokes once no operation owns the channel
    pub async fn terminal_input(&self, data: &str) -> Result<()> {
        let _channel = self.inner.channel_lock.lock().await;
        self.send_command(data).await?;
        Ok(())
    }

    /// Run a script in raw mode and echo what it printed. When the channel
    /// is taken the sink is told the device is busy and nothing is sent.
    pub async fn run_script(&self, source: &str) -> Result<Option<String>> {
        let Ok(_channel) = Arc::clone(&self.inner.channel_lock).try_lock_owned() else {
            self.inner.sink.output("Device busy\r\n");
            return Ok(None);
        };
        if self.mode().await.is_raw() {
            self.inner.sink.output("Device busy\r\n");
            return Ok(None);
        }

        self.enter_raw_mode().await?;
        sleep(self.inner.config.settle_delay()).await;
        let reply = self.send_command(source).await;
        let exit = self.exit_raw_mode().await;
        let reply = reply?;
        exit?;

        if let Some(output) = reply.as_deref().and_then(extract_output) {
            self.inner.sink.output(&output);
        }
        Ok(reply)
    }

    /// Queue raw bytes on the REPL channel as typed, bypassing the lock.
    /// Used for interrupts (Ctrl-C) that must reach a busy device.
    pub async fn send_interrupt(&self, bytes: &[u8]) {
        self.enqueue_repl(bytes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_success_requires_framing() {
        assert!(succeeded(&Some("OK\x04\x04>".to_string())));
        assert!(!succeeded(&Some("OK\x04Traceback\r\nOSError: 17\r\n\x04>".to_string())));
        assert!(!succeeded(&Some(">".to_string())));
        assert!(!succeeded(&None));
    }

    #[test]
    fn test_device_entry_parses_listing() {
        let entries: Vec<DeviceEntry> =
            serde_json::from_str(r#"[{"name": "main.py", "file": true}, {"name": "lib", "file": false}]"#)
                .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].file);
        assert_eq!(entries[1].name, "lib");
    }

    #[test]
    fn test_bulk_report_completeness() {
        let mut report = BulkWriteReport::default();
        report.written.push("/main.py".into());
        assert!(report.is_complete());
        report.skipped.push("/big.bin".into());
        assert!(!report.is_complete());
    }
}
