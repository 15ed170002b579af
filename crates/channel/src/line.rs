//! Newline-delimited JSON channel over any async reader/writer pair.

use std::io;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::{MAX_FRAME_SIZE, decode_line, encode_responses};
use crate::{Batch, Channel, Response, Result};

/// Number of decoded batches buffered ahead of the consumer.
const QUEUE_DEPTH: usize = 16;

/// Handle to a background frame reader.
///
/// Batches are delivered through [`Subscription::next`]. The reader task is
/// stopped by [`Subscription::unsubscribe`] or when the handle is dropped, so
/// it never outlives the consumer.
pub struct Subscription {
    batches: mpsc::Receiver<Batch>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Next decoded batch, or `None` once the reader has finished.
    pub async fn next(&mut self) -> Option<Batch> {
        self.batches.recv().await
    }

    /// Whether the reader task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the reader and discard anything still queued.
    pub fn unsubscribe(mut self) {
        self.batches.close();
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start reading frames from `reader` on a background task.
pub fn subscribe<R>(reader: R) -> Subscription
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    let task = tokio::spawn(read_frames(BufReader::new(reader), tx));
    Subscription { batches: rx, task }
}

async fn read_frames<R>(mut reader: R, tx: mpsc::Sender<Batch>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let frame = match read_frame(&mut reader, &mut buf).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "channel read failed");
                break;
            }
        };

        let bytes = match frame {
            Frame::Eof => {
                debug!("channel input closed");
                break;
            }
            Frame::Oversized(size) => {
                warn!(size, max = MAX_FRAME_SIZE, "skipping oversized frame");
                continue;
            }
            Frame::Line => buf.as_slice(),
        };

        let Ok(text) = std::str::from_utf8(bytes) else {
            warn!("skipping frame that is not valid UTF-8");
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        match decode_line(text) {
            Ok(Some(batch)) => {
                debug!(calls = batch.len(), "received batch");
                if tx.send(batch).await.is_err() {
                    break;
                }
            }
            Ok(None) => trace!("ignoring frame without tool calls"),
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    }
}

enum Frame {
    /// A complete line is in the buffer.
    Line,
    /// The line exceeded [`MAX_FRAME_SIZE`] and was discarded.
    Oversized(usize),
    Eof,
}

/// Read one line into `buf`, buffering at most `MAX_FRAME_SIZE + 1` bytes.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || (read as u64) < limit {
        return Ok(Frame::Line);
    }

    // Over the limit: drop the rest of the line without buffering it.
    buf.clear();
    let mut size = read;
    loop {
        let (consumed, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                break;
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(newline) => (newline + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(consumed);
        size += consumed;
        if done {
            break;
        }
    }
    Ok(Frame::Oversized(size))
}

/// A [`Channel`] reading frames from one stream and writing responses to another.
pub struct LineChannel<W> {
    subscription: Subscription,
    writer: W,
}

impl LineChannel<tokio::io::Stdout> {
    /// Channel over the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<W> LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            subscription: subscribe(reader),
            writer,
        }
    }

    /// Stop reading and hand back the writer.
    pub fn close(self) -> W {
        self.subscription.unsubscribe();
        self.writer
    }
}

impl<W> Channel for LineChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<Batch>> {
        Ok(self.subscription.next().await)
    }

    async fn send(&mut self, responses: Vec<Response>) -> Result<()> {
        let line = encode_responses(responses)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}
