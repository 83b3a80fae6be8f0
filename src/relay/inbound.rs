//! Bus → peer relay.
//!
//! Runs on a blocking thread because the bus wait is a blocking call. Every
//! drained frame is logged for the operator, encoded, and queued to the
//! connected peer (if any). Nothing on this path can block on the peer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::PeerSlot;
use crate::bus::SharedBus;
use crate::codec::FrameCodec;
use crate::error::BridgeError;
use crate::protocol::Frame;
use crate::relay::RelayStats;
use crate::shutdown::ShutdownSignal;

/// Default bound on a single bus wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Bus → peer relay loop.
pub struct InboundRelay {
    bus: SharedBus,
    slot: Arc<PeerSlot>,
    stats: Arc<RelayStats>,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
}

impl InboundRelay {
    pub fn new(
        bus: SharedBus,
        slot: Arc<PeerSlot>,
        stats: Arc<RelayStats>,
        shutdown: ShutdownSignal,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            slot,
            stats,
            shutdown,
            poll_timeout,
        }
    }

    /// Run the loop on tokio's blocking pool.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Wait/drain until the shutdown signal is observed.
    ///
    /// Shutdown latency is bounded by one poll timeout plus one drain.
    pub fn run(&self) {
        debug!("Inbound relay started");

        while !self.shutdown.is_triggered() {
            if !self.bus.receive_ready(self.poll_timeout) {
                continue;
            }

            let frames = match self.bus.drain_frames() {
                Ok(frames) => frames,
                Err(e) => {
                    warn!("Bus receive failed: {}", e);
                    self.stats.bus_receive_error();
                    continue;
                }
            };

            for frame in &frames {
                self.forward(frame);
            }
        }

        debug!("Inbound relay stopped");
    }

    fn forward(&self, frame: &Frame) {
        self.stats.frame_received();
        info!(target: "can_bridge::frames", "{}", frame);

        let Some(peer) = self.slot.current() else {
            return;
        };

        let line = match FrameCodec::encode_line(frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping frame 0x{:X}: {}", frame.id(), e);
                self.stats.forward_failed();
                return;
            }
        };

        match peer.writer().try_send(line) {
            Ok(()) => self.stats.frame_forwarded(),
            Err(BridgeError::PeerBacklogFull) => {
                warn!("Peer {} backlog full, frame 0x{:X} dropped", peer.id(), frame.id());
                self.stats.forward_failed();
            }
            Err(e) => {
                debug!("Peer {} unavailable: {}", peer.id(), e);
                self.stats.forward_failed();
            }
        }
    }
}
