//! Dedicated writer task per connected peer.
//!
//! Outbound messages go through an mpsc channel to a task that owns the
//! write half of the stream. Several queued messages are flushed together
//! with vectored writes.
//!
//! ```text
//! Endpoint ─► mpsc::Sender<OutboundMessage> ─► Writer Task ─► Socket
//! ```
//!
//! Dropping every [`WriterHandle`] closes the channel; the task drains what
//! is already queued, flushes, and exits. Endpoints rely on this to deliver
//! a final reply before closing.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ZrpcError};
use crate::protocol::{Multipart, HEADER_SIZE};

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A message ready to be written: encoded part headers plus payloads.
#[derive(Debug)]
pub struct OutboundMessage {
    headers: Vec<[u8; HEADER_SIZE]>,
    parts: Vec<Bytes>,
}

impl OutboundMessage {
    /// Prepare a multipart message for writing.
    pub fn new(message: Multipart) -> Self {
        let headers = message.headers();
        Self {
            headers,
            parts: message.into_parts(),
        }
    }

    /// Total size on the wire (headers + payloads).
    #[inline]
    pub fn size(&self) -> usize {
        self.headers.len() * HEADER_SIZE + self.parts.iter().map(Bytes::len).sum::<usize>()
    }

    /// Wire segments in order, skipping empty payloads.
    fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.headers
            .iter()
            .zip(&self.parts)
            .flat_map(|(h, p)| [&h[..], &p[..]])
            .filter(|s| !s.is_empty())
    }
}

/// Handle for sending messages to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMessage>,
}

impl WriterHandle {
    /// Queue a message, waiting if the channel is full.
    pub async fn send(&self, message: Multipart) -> Result<()> {
        self.tx
            .send(OutboundMessage::new(message))
            .await
            .map_err(|_| ZrpcError::ConnectionClosed)
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending messages.
pub fn spawn_writer_task<W>(writer: W, channel_capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives messages and writes them to the socket.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundMessage>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(m) => m,
            None => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of messages using vectored I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundMessage::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ZrpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundMessage], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::new();
    let mut offset = 0;

    for segment in batch.iter().flat_map(|m| m.segments()) {
        let end = offset + segment.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&segment[start..]));
        }
        offset = end;
    }

    slices
}
