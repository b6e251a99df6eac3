//! Outbound byte queue
//!
//! Producers append at the tail; the drain task takes at most one MTU-sized
//! prefix at a time and removes it from the head only once the transport has
//! settled the write. A queue has at most one write outstanding.

use std::collections::VecDeque;

use crate::errors::TransportError;

// ----------------------------------------------------------------------------
// Channels
// ----------------------------------------------------------------------------

/// Logical outbound channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Repl,
    RawData,
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Channel::Repl => write!(f, "repl"),
            Channel::RawData => write!(f, "raw-data"),
        }
    }
}

// ----------------------------------------------------------------------------
// Outbound Queue
// ----------------------------------------------------------------------------

/// A prefix handed to the transport, tagged with the queue generation it
/// was taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub bytes: Vec<u8>,
    generation: u64,
}

/// What happened to a settled write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSettlement {
    /// Prefix delivered and removed
    Sent,
    /// Transport was busy; the same prefix goes out on the next tick
    Retry,
    /// Non-transient failure; the prefix was dropped
    Discarded,
    /// The queue was cleared while the write was outstanding
    Stale,
}

/// Ordered pending bytes for one channel
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<u8>,
    in_flight: bool,
    generation: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes at the tail
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Take the next prefix of at most `mtu` bytes and mark the queue busy.
    /// Returns `None` while a write is outstanding or nothing is queued.
    pub fn begin_write(&mut self, mtu: usize) -> Option<PendingWrite> {
        if self.in_flight || self.pending.is_empty() {
            return None;
        }

        let len = mtu.min(self.pending.len());
        let bytes: Vec<u8> = self.pending.iter().take(len).copied().collect();
        self.in_flight = true;

        Some(PendingWrite {
            bytes,
            generation: self.generation,
        })
    }

    /// Settle an outstanding write with the transport's result
    pub fn settle(
        &mut self,
        write: &PendingWrite,
        result: &Result<(), TransportError>,
    ) -> WriteSettlement {
        if write.generation != self.generation {
            return WriteSettlement::Stale;
        }

        self.in_flight = false;
        match result {
            Ok(()) => {
                self.pending.drain(..write.bytes.len());
                WriteSettlement::Sent
            }
            Err(e) if e.is_transient() => WriteSettlement::Retry,
            Err(_) => {
                self.pending.drain(..write.bytes.len());
                WriteSettlement::Discarded
            }
        }
    }

    /// Drop everything, including the claim of an outstanding write
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = false;
        self.generation = self.generation.wrapping_add(1);
    }
}
