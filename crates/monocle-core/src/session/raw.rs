//! Raw REPL mode: entering, leaving and request/response commands

use std::sync::atomic::Ordering;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::DeviceSession;
use crate::errors::{MonocleError, Result};
use crate::protocol::{ENTER_RAW_MODE, EXIT_RAW_MODE, FRIENDLY_PROMPT_MARKER, RAW_REPL_BANNER};
use crate::queue::Channel;
use crate::repl::{echo_after_prompt, escape_control, frame_command, ReplMode, ReplyTerminator};

/// Replies skipped while waiting for a mode banner before giving up
const MAX_STALE_REPLIES: usize = 3;

impl DeviceSession {
    /// Switch the device to the raw REPL and wait for its banner.
    /// A missing banner is logged; the session still counts as raw.
    pub async fn enter_raw_mode(&self) -> Result<()> {
        self.ensure_connected().await?;
        if !self.is_connected() {
            return Err(MonocleError::NotConnected);
        }

        {
            let mut state = self.inner.state.lock().await;
            state.mode = ReplMode::EnteringRaw;
            state.collector.clear();
        }
        info!("Entering raw REPL");

        match self.await_banner(ENTER_RAW_MODE, |reply| reply.contains(RAW_REPL_BANNER)).await {
            Ok(acknowledged) => {
                if !acknowledged {
                    warn!("Raw REPL banner not received");
                }
                let mut state = self.inner.state.lock().await;
                if state.mode == ReplMode::EnteringRaw {
                    state.mode = ReplMode::RawActive;
                }
                Ok(())
            }
            Err(e) => {
                self.inner.state.lock().await.reset_raw_state();
                Err(e)
            }
        }
    }

    /// Return the device to the friendly REPL
    pub async fn exit_raw_mode(&self) -> Result<()> {
        if !self.is_connected() {
            self.inner.state.lock().await.reset_raw_state();
            return Ok(());
        }

        self.inner.state.lock().await.mode = ReplMode::ExitingRaw;
        info!("Leaving raw REPL");

        let result = self
            .await_banner(EXIT_RAW_MODE, |reply| reply.ends_with(FRIENDLY_PROMPT_MARKER))
            .await;
        self.inner.state.lock().await.reset_raw_state();

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("Friendly prompt not received after leaving raw REPL");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Send one command. In raw mode the call resolves with the complete
    /// reply, or `None` when the device stays silent past the response
    /// timeout. In normal mode the bytes are queued and `None` returned.
    ///
    /// The command is dropped (`Ok(None)`) when no connection can be made.
    pub async fn send_command(&self, text: &str) -> Result<Option<String>> {
        if let Err(e) = self.ensure_connected().await {
            debug!("Dropping command, connection unavailable: {}", e);
            return Ok(None);
        }
        if !self.is_connected() {
            debug!("Dropping command, not connected");
            return Ok(None);
        }

        let waiter = {
            let mut state = self.inner.state.lock().await;
            let raw = state.mode.is_raw();
            let framed = frame_command(text, raw);

            let waiter = if raw {
                if state.pending.is_some() {
                    return Err(MonocleError::CommandPending);
                }
                debug!("raw >> {}", escape_control(&framed));
                let terminator = ReplyTerminator::for_command(text, state.mode);
                state.collector.expect(terminator);
                let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
                Some((id, state.register_pending(id)))
            } else {
                None
            };

            state.repl_queue.push(framed.as_bytes());
            waiter
        };

        match waiter {
            Some((id, rx)) => self.await_reply(id, rx).await,
            None => Ok(None),
        }
    }

    /// Send a mode switch sequence and wait until a reply satisfies
    /// `accept`. Late replies to earlier commands are skipped.
    async fn await_banner(&self, sequence: &str, accept: fn(&str) -> bool) -> Result<bool> {
        let mut reply = self.send_command(sequence).await?;
        for _ in 0..MAX_STALE_REPLIES {
            match &reply {
                Some(text) if accept(text) => return Ok(true),
                Some(text) => {
                    debug!("Skipping stale reply: {}", escape_control(text));
                    reply = self.next_reply().await?;
                }
                None => return Ok(false),
            }
        }
        Ok(reply.as_deref().map(accept).unwrap_or(false))
    }

    /// Wait for another reply without sending anything
    async fn next_reply(&self) -> Result<Option<String>> {
        let (id, rx) = {
            let mut state = self.inner.state.lock().await;
            if state.pending.is_some() {
                return Err(MonocleError::CommandPending);
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            (id, state.register_pending(id))
        };
        self.await_reply(id, rx).await
    }

    async fn await_reply(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<String>>,
    ) -> Result<Option<String>> {
        match timeout(self.inner.config.response_timeout(), rx).await {
            Ok(Ok(Ok(reply))) => {
                debug!("raw << {}", escape_control(&reply));
                Ok(Some(reply))
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(MonocleError::Disconnected),
            Err(_) => {
                let mut state = self.inner.state.lock().await;
                if state.pending.as_ref().map(|p| p.id) == Some(id) {
                    state.pending = None;
                    state.collector.clear();
                }
                warn!(
                    "No reply within {}ms",
                    self.inner.config.response_timeout_ms
                );
                Ok(None)
            }
        }
    }

    /// Route REPL notifications: raw replies go to the pending waiter,
    /// everything else is terminal output
    pub(super) async fn handle_repl_data(&self, value: &[u8]) {
        let forward = {
            let mut state = self.inner.state.lock().await;
            let text = state.decoder.decode(value);

            if state.mode.is_raw() {
                if let Some(reply) = state.collector.push(&text) {
                    match state.pending.take() {
                        Some(pending) => {
                            let _ = pending.tx.send(Ok(reply));
                        }
                        None => debug!("Unsolicited raw reply: {}", escape_control(&reply)),
                    }
                }
                None
            } else if state.internal_operation {
                echo_after_prompt(&text).map(str::to_string)
            } else {
                Some(text)
            }
        };

        if let Some(text) = forward.filter(|text| !text.is_empty()) {
            self.inner.sink.output(&text);
        }
    }

    /// Queue bytes on the REPL channel without framing or waiting
    pub(super) async fn enqueue_repl(&self, bytes: &[u8]) {
        self.enqueue(Channel::Repl, bytes).await;
    }
}
