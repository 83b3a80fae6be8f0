//! Peer → bus relay.
//!
//! One task per connection. Bytes from the read half are reassembled into
//! records by a [`LineBuffer`]; each complete record is decoded and handed
//! to the bus. A bad record is logged and skipped, it never ends the
//! connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{ConnectionId, PeerSlot};
use crate::bus::SharedBus;
use crate::codec::FrameCodec;
use crate::protocol::{Line, LineBuffer, DEFAULT_MAX_RECORD_LEN};
use crate::relay::RelayStats;
use crate::shutdown::ShutdownSignal;

/// Bytes requested per socket read.
pub const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Peer → bus relay for one connection.
pub struct OutboundRelay<R> {
    id: ConnectionId,
    reader: R,
    bus: SharedBus,
    slot: Arc<PeerSlot>,
    stats: Arc<RelayStats>,
    shutdown: ShutdownSignal,
    closed: ShutdownSignal,
    max_record_len: usize,
}

impl<R> OutboundRelay<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(
        id: ConnectionId,
        reader: R,
        bus: SharedBus,
        slot: Arc<PeerSlot>,
        stats: Arc<RelayStats>,
        shutdown: ShutdownSignal,
        closed: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            reader,
            bus,
            slot,
            stats,
            shutdown,
            closed,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Limit on a single record; longer input is discarded to the next newline.
    pub fn max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Read until EOF, read error, connection close or bridge shutdown.
    ///
    /// On exit the connection is closed and removed from the slot, unless a
    /// newer connection has already replaced it.
    pub async fn run(mut self) {
        let mut lines = LineBuffer::with_max_record_len(self.max_record_len);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = tokio::select! {
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Peer {} disconnected", self.id);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Peer {} read failed: {}", self.id, e);
                        break;
                    }
                },
                _ = self.closed.wait() => {
                    debug!("Peer {} closed", self.id);
                    break;
                }
                _ = self.shutdown.wait() => break,
            };

            for line in lines.push(&buf[..n]) {
                self.handle_line(line);
            }
        }

        self.closed.trigger();
        if self.slot.clear_if(self.id) {
            debug!("Peer {} removed from slot", self.id);
        }
    }

    fn handle_line(&self, line: Line) {
        let record = match line {
            Line::Record(record) => record,
            Line::Oversized(dropped) => {
                warn!(
                    "Peer {} sent a record over {} bytes, {} bytes discarded",
                    self.id, self.max_record_len, dropped
                );
                self.stats.record_rejected();
                return;
            }
        };

        self.stats.record_received();

        let frame = match FrameCodec::decode_line(&record) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Peer {} sent a bad record: {}", self.id, e);
                self.stats.record_rejected();
                return;
            }
        };

        if let Err(e) = self.bus.transmit(&frame) {
            warn!("Transmit of 0x{:X} failed: {}", frame.id(), e);
            self.stats.transmit_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::VirtualBus;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};

    struct Harness {
        bus: Arc<VirtualBus>,
        stats: Arc<RelayStats>,
        shutdown: ShutdownSignal,
        closed: ShutdownSignal,
        task: JoinHandle<()>,
    }

    fn start(reader: tokio::io::DuplexStream, max_record_len: usize) -> Harness {
        let bus = Arc::new(VirtualBus::with_options(false, true));
        let stats = Arc::new(RelayStats::new());
        let shutdown = ShutdownSignal::new();
        let closed = ShutdownSignal::new();

        let task = OutboundRelay::new(
            7,
            reader,
            bus.clone(),
            Arc::new(PeerSlot::new()),
            stats.clone(),
            shutdown.clone(),
            closed.clone(),
        )
        .max_record_len(max_record_len)
        .spawn();

        Harness {
            bus,
            stats,
            shutdown,
            closed,
            task,
        }
    }

    #[tokio::test]
    async fn test_record_is_transmitted() {
        let (mut peer, reader) = duplex(4096);
        let h = start(reader, DEFAULT_MAX_RECORD_LEN);

        peer.write_all(b"{\"Time\":0,\"ID\":512,\"DLC\":2,\"Data\":[9,9]}\n")
            .await
            .unwrap();
        drop(peer);

        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap();

        let sent = h.bus.transmitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 512);
        assert_eq!(sent[0].data(), &[9, 9]);
        assert!(h.closed.is_triggered());
    }

    #[tokio::test]
    async fn test_split_records_in_order() {
        let (mut peer, reader) = duplex(4096);
        let h = start(reader, DEFAULT_MAX_RECORD_LEN);

        peer.write_all(b"{\"ID\":1,\"DLC\":0,\"Data\":[]}\n{\"ID\":2,\"DL")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write_all(b"C\":1,\"Data\":[5]}\n").await.unwrap();
        drop(peer);

        h.task.await.unwrap();

        let ids: Vec<u32> = h.bus.transmitted().iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped() {
        let (mut peer, reader) = duplex(4096);
        let h = start(reader, 64);

        peer.write_all(b"not json\n").await.unwrap();
        peer.write_all(b"{\"ID\":3,\"DLC\":5,\"Data\":[1]}\n").await.unwrap();
        peer.write_all(&[b'x'; 100]).await.unwrap();
        peer.write_all(b"\n{\"ID\":4,\"DLC\":1,\"Data\":[1]}\n").await.unwrap();
        drop(peer);

        h.task.await.unwrap();

        let sent = h.bus.transmitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), 4);

        let snap = h.stats.snapshot();
        assert_eq!(snap.records_rejected, 3);
        assert_eq!(snap.records_received, 3);
    }

    #[tokio::test]
    async fn test_transmit_failure_keeps_reading() {
        let (mut peer, reader) = duplex(4096);
        let h = start(reader, DEFAULT_MAX_RECORD_LEN);

        h.bus.close();
        peer.write_all(b"{\"ID\":1,\"DLC\":0,\"Data\":[]}\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!h.task.is_finished());

        drop(peer);
        h.task.await.unwrap();
        assert_eq!(h.stats.snapshot().transmit_failures, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_relay() {
        let (_peer, reader) = duplex(4096);
        let h = start(reader, DEFAULT_MAX_RECORD_LEN);

        h.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .unwrap()
            .unwrap();
    }
}
