//! Bridge builder and lifecycle.
//!
//! The [`BridgeBuilder`] provides a fluent API for configuring the bridge.
//! [`BridgeBuilder::start`] brings every loop up before returning:
//! 1. Bind the peer listener
//! 2. Spawn the accept loop
//! 3. Spawn the inbound relay on a blocking thread
//! 4. Build the cyclic controller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use can_bridge::bus::VirtualBus;
//! use can_bridge::BridgeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> can_bridge::Result<()> {
//!     let bridge = BridgeBuilder::new(Arc::new(VirtualBus::new()))
//!         .listen_addr("127.0.0.1:5000")
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{BrokerContext, ConnectionBroker, PeerSlot};
use crate::bus::{CyclicSpec, SharedBus};
use crate::config::{BridgeConfig, DEFAULT_LISTEN_ADDR};
use crate::cyclic::{CyclicController, CyclicState};
use crate::error::Result;
use crate::protocol::{Frame, DEFAULT_MAX_RECORD_LEN};
use crate::relay::{InboundRelay, RelayStats, StatsSnapshot, DEFAULT_POLL_TIMEOUT};
use crate::shutdown::ShutdownSignal;
use crate::writer::WriterConfig;

/// Builder for configuring and starting a [`Bridge`].
pub struct BridgeBuilder {
    bus: SharedBus,
    listen_addr: String,
    poll_timeout: Duration,
    cyclic_spec: CyclicSpec,
    writer_config: WriterConfig,
    max_record_len: usize,
}

impl BridgeBuilder {
    /// Start from defaults around `bus`.
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            cyclic_spec: CyclicSpec::default(),
            writer_config: WriterConfig::default(),
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Apply every setting from a validated configuration.
    pub fn from_config(bus: SharedBus, config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(bus)
            .listen_addr(config.listen_addr.clone())
            .poll_timeout(config.poll_timeout())
            .cyclic_spec(config.cyclic_spec()?)
            .writer_channel_capacity(config.writer_channel_capacity)
            .max_record_len(config.max_record_len))
    }

    /// Peer listener address. Port 0 picks a free port.
    ///
    /// Default: `127.0.0.1:5000`
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Upper bound on one bus wait.
    ///
    /// Default: 100 ms
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// The periodic frame driven by [`Bridge::toggle_cyclic`].
    pub fn cyclic_spec(mut self, spec: CyclicSpec) -> Self {
        self.cyclic_spec = spec;
        self
    }

    /// Records queued per peer before new ones are dropped.
    ///
    /// Default: 1024
    pub fn writer_channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Longest accepted peer record.
    ///
    /// Default: 4096
    pub fn max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    /// Bind, spawn every loop and return the running bridge.
    ///
    /// Fails only if the listener cannot be bound.
    pub async fn start(self) -> Result<Bridge> {
        let shutdown = ShutdownSignal::new();

        let mut ctx = BrokerContext::new(self.bus.clone(), shutdown.clone());
        ctx.writer_config = self.writer_config;
        ctx.max_record_len = self.max_record_len;
        let slot = ctx.slot.clone();
        let stats = ctx.stats.clone();

        let broker = ConnectionBroker::bind(self.listen_addr.as_str(), ctx).await?;
        let local_addr = broker.local_addr()?;
        let accept_task = broker.spawn();

        let inbound_task = InboundRelay::new(
            self.bus.clone(),
            slot.clone(),
            stats.clone(),
            shutdown.clone(),
            self.poll_timeout,
        )
        .spawn();

        let cyclic = CyclicController::new(self.bus.clone(), self.cyclic_spec);

        info!("Bridge running on {}", local_addr);

        Ok(Bridge {
            bus: self.bus,
            local_addr,
            slot,
            stats,
            shutdown,
            cyclic,
            inbound_task: Some(inbound_task),
            accept_task: Some(accept_task),
        })
    }
}

/// A running bridge.
///
/// Call [`shutdown`](Bridge::shutdown) for an orderly stop. Dropping the
/// bridge without it only raises the shutdown signal; the loops then exit
/// on their own.
pub struct Bridge {
    bus: SharedBus,
    local_addr: SocketAddr,
    slot: Arc<PeerSlot>,
    stats: Arc<RelayStats>,
    shutdown: ShutdownSignal,
    cyclic: CyclicController,
    inbound_task: Option<JoinHandle<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl Bridge {
    pub fn builder(bus: SharedBus) -> BridgeBuilder {
        BridgeBuilder::new(bus)
    }

    /// Address peers connect to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hand one frame to the bus now.
    ///
    /// The peer only sees it if the bus reports it back.
    pub fn transmit(&self, frame: &Frame) -> Result<()> {
        self.bus.transmit(frame)?;
        debug!("Operator sent 0x{:X}", frame.id());
        Ok(())
    }

    /// Flip the periodic frame on or off.
    pub fn toggle_cyclic(&self) -> Result<CyclicState> {
        self.cyclic.toggle()
    }

    pub fn cyclic(&self) -> &CyclicController {
        &self.cyclic
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A clone of the bridge-wide shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn is_peer_connected(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Orderly stop.
    ///
    /// Stops the cyclic frame, raises the signal, joins the inbound relay
    /// and the accept loop and closes the current peer. The bridge's bus
    /// handle is released when it returns.
    pub async fn shutdown(mut self) {
        if self.cyclic.is_supported() {
            if let Err(e) = self.cyclic.stop() {
                warn!("Failed to stop cyclic frame: {}", e);
            }
        }

        self.shutdown.trigger();

        if let Some(task) = self.inbound_task.take() {
            if let Err(e) = task.await {
                warn!("Inbound relay ended abnormally: {}", e);
            }
        }

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!("Accept loop ended abnormally: {}", e);
            }
        }

        if let Some(peer) = self.slot.take() {
            peer.close();
        }

        info!("Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
