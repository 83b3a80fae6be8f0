//! The two relay directions and their shared counters.
//!
//! - [`InboundRelay`]: bus → peer, one blocking thread per bridge
//! - [`OutboundRelay`]: peer → bus, one task per accepted connection

mod inbound;
mod outbound;

pub use inbound::{InboundRelay, DEFAULT_POLL_TIMEOUT};
pub use outbound::{OutboundRelay, READ_CHUNK_SIZE};

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by both relay directions.
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_received: AtomicU64,
    frames_forwarded: AtomicU64,
    forward_failures: AtomicU64,
    bus_receive_errors: AtomicU64,
    records_received: AtomicU64,
    records_rejected: AtomicU64,
    transmit_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames drained from the bus.
    pub frames_received: u64,
    /// Frames queued to a connected peer.
    pub frames_forwarded: u64,
    /// Frames that failed to encode or could not be queued.
    pub forward_failures: u64,
    /// Errors returned by the bus while draining.
    pub bus_receive_errors: u64,
    /// Complete records read from peers.
    pub records_received: u64,
    /// Records that were malformed or oversized.
    pub records_rejected: u64,
    /// Decoded frames the bus refused to transmit.
    pub transmit_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            bus_receive_errors: self.bus_receive_errors.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn frame_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn forward_failed(&self) {
        self.forward_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bus_receive_error(&self) {
        self.bus_receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn transmit_failed(&self) {
        self.transmit_failures.fetch_add(1, Ordering::Relaxed);
    }
}
