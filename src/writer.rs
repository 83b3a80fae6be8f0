//! Per-connection writer task.
//!
//! Each peer connection owns one writer task that drains an mpsc channel of
//! encoded records and writes them to the socket's write half. The inbound
//! relay never touches the socket; it hands records over with a
//! non-blocking [`try_send`](LineWriterHandle::try_send), so a slow peer can
//! never stall bus reception.
//!
//! # Architecture
//!
//! ```text
//! InboundRelay ─► mpsc::Sender<Bytes> ─► Writer Task ─► TCP write half
//! ```
//!
//! The channel is FIFO and has a single consumer, so the peer sees records
//! in the order they were queued. Ready records are batched into a single
//! vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::shutdown::ShutdownSignal;

/// Default channel capacity (records queued per peer).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum records written in a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Records queued before `try_send` reports a full backlog.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for queueing records to a peer's writer task.
#[derive(Clone)]
pub struct LineWriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl LineWriterHandle {
    /// Queue one encoded record without waiting.
    ///
    /// # Errors
    ///
    /// `PeerBacklogFull` when the channel is at capacity (the record is
    /// dropped), `ConnectionClosed` when the writer task has exited.
    pub fn try_send(&self, line: Bytes) -> Result<()> {
        self.tx.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::PeerBacklogFull,
            mpsc::error::TrySendError::Closed(_) => BridgeError::ConnectionClosed,
        })
    }

    /// True once the writer task has stopped consuming.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task for one connection.
///
/// The task ends when every handle is dropped, when `closed` is triggered,
/// or on the first write error. A write error triggers `closed` so the rest
/// of the connection (its outbound relay, the broker slot) learns the peer
/// is gone.
pub fn spawn_line_writer<W>(
    writer: W,
    config: WriterConfig,
    closed: ShutdownSignal,
) -> (LineWriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let handle = LineWriterHandle { tx };

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, &closed).await;
        if let Err(e) = &result {
            warn!("Peer write failed: {}", e);
            closed.trigger();
        }
        result
    });

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    closed: &ShutdownSignal,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = closed.wait() => break,
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        // A stalled peer must not hold the connection open past close
        tokio::select! {
            written = write_batch(&mut writer, &batch) => written?,
            _ = closed.wait() => break,
        }
    }

    debug!("Peer writer stopping");
    // Peer may already be gone
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of records with as few vectored writes as possible.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "peer accepted no bytes",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices for the part of `batch` not yet written.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for line in batch {
        let end = offset + line.len();
        if skip_bytes < end && !line.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&line[start..]));
        }
        offset = end;
    }

    slices
}
