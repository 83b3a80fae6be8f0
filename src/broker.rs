//! Connection broker: accept loop plus the single peer slot.
//!
//! The bridge serves one peer at a time. A new connection always wins: it
//! is installed in the [`PeerSlot`] and the previous peer is closed, so the
//! inbound relay never writes to two sockets.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bus::SharedBus;
use crate::error::Result;
use crate::protocol::DEFAULT_MAX_RECORD_LEN;
use crate::relay::{OutboundRelay, RelayStats};
use crate::shutdown::ShutdownSignal;
use crate::writer::{spawn_line_writer, LineWriterHandle, WriterConfig};

/// Monotonic identifier of an accepted connection.
pub type ConnectionId = u64;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The live peer: its writer handle and close flag.
pub struct PeerConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: LineWriterHandle,
    closed: ShutdownSignal,
}

impl PeerConnection {
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: LineWriterHandle,
        closed: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            peer_addr,
            writer,
            closed,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[inline]
    pub fn writer(&self) -> &LineWriterHandle {
        &self.writer
    }

    /// Ask the writer task and outbound relay to stop; releases the socket.
    pub fn close(&self) {
        if self.closed.trigger() {
            debug!("Closing peer {} ({})", self.id, self.peer_addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Holder of at most one [`PeerConnection`].
///
/// Readers clone the `Arc` out of the lock, so a replacement never tears a
/// write in progress: the old peer's writer just sees its channel close.
#[derive(Debug, Default)]
pub struct PeerSlot {
    inner: RwLock<Option<Arc<PeerConnection>>>,
}

impl PeerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current peer, if any.
    pub fn current(&self) -> Option<Arc<PeerConnection>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `peer`, returning the one it displaced.
    pub fn replace(&self, peer: Arc<PeerConnection>) -> Option<Arc<PeerConnection>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(peer)
    }

    /// Empty the slot only if it still holds connection `id`.
    pub fn clear_if(&self, id: ConnectionId) -> bool {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|peer| peer.id() == id) {
            *slot = None;
            return true;
        }
        false
    }

    /// Empty the slot unconditionally.
    pub fn take(&self) -> Option<Arc<PeerConnection>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Everything a connection needs from the bridge.
#[derive(Clone)]
pub struct BrokerContext {
    pub bus: SharedBus,
    pub slot: Arc<PeerSlot>,
    pub stats: Arc<RelayStats>,
    pub shutdown: ShutdownSignal,
    pub writer_config: WriterConfig,
    pub max_record_len: usize,
}

impl BrokerContext {
    pub fn new(bus: SharedBus, shutdown: ShutdownSignal) -> Self {
        Self {
            bus,
            slot: Arc::new(PeerSlot::new()),
            stats: Arc::new(RelayStats::new()),
            shutdown,
            writer_config: WriterConfig::default(),
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

/// Bound listener plus the accept loop.
pub struct ConnectionBroker {
    listener: TcpListener,
    ctx: BrokerContext,
    next_id: ConnectionId,
}

impl ConnectionBroker {
    /// Bind the listener. Failure here is fatal to bridge start-up.
    pub async fn bind<A: ToSocketAddrs>(addr: A, ctx: BrokerContext) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for peers on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx,
            next_id: 1,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn slot(&self) -> Arc<PeerSlot> {
        self.ctx.slot.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept peers until shutdown.
    pub async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = self.ctx.shutdown.wait() => break,
            };

            match accepted {
                Ok((stream, addr)) => self.install(stream, addr),
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        _ = self.ctx.shutdown.wait() => break,
                    }
                }
            }
        }

        debug!("Accept loop stopped");
    }

    /// Wire up a fresh connection and make it the current peer.
    fn install(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", addr, e);
        }

        let (reader, write_half) = stream.into_split();
        let closed = ShutdownSignal::new();

        let (writer, _writer_task) =
            spawn_line_writer(write_half, self.ctx.writer_config.clone(), closed.clone());

        OutboundRelay::new(
            id,
            reader,
            self.ctx.bus.clone(),
            self.ctx.slot.clone(),
            self.ctx.stats.clone(),
            self.ctx.shutdown.clone(),
            closed.clone(),
        )
        .max_record_len(self.ctx.max_record_len)
        .spawn();

        let peer = Arc::new(PeerConnection::new(id, addr, writer, closed));
        info!("Peer {} connected from {}", id, addr);

        if let Some(previous) = self.ctx.slot.replace(peer) {
            info!("Peer {} replaced by peer {}", previous.id(), id);
            previous.close();
        }
    }
}
