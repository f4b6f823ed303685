//! Byte-stream wrappers used on both serving paths
//!
//! Every body that crosses the service is a [`ByteStream`]. The wrappers
//! here add the two properties the pipeline depends on: a byte count that
//! is reported even when the client disconnects mid-transfer, and a hard
//! size cap that errors the stream instead of letting an oversized origin
//! response through. [`tee`] splits one stream into two consumers with
//! bounded buffering, so a client disconnect never tears down the cache
//! write branch.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// The body stream type used throughout the service
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// A spawned task that drives a [`tee`] to completion
pub type TeeDriver = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How a metered stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Source ran to completion; total bytes delivered
    Completed(u64),
    /// Consumer went away or the source errored; bytes delivered so far
    Cancelled(u64),
    /// The size cap tripped mid-stream; bytes delivered up to the trip
    Overflowed(u64),
}

impl StreamOutcome {
    /// Bytes that actually went past this point, whatever the ending.
    pub fn bytes(&self) -> u64 {
        match self {
            StreamOutcome::Completed(n)
            | StreamOutcome::Cancelled(n)
            | StreamOutcome::Overflowed(n) => *n,
        }
    }
}

/// Receiver half for a metered stream's final byte count
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<StreamOutcome>,
}

impl DeliveryReceipt {
    /// Wait for the stream to finish one way or another.
    ///
    /// Never hangs: the sending side fires on completion, on overflow, and
    /// from `Drop` when the stream is cancelled.
    pub async fn outcome(self) -> StreamOutcome {
        self.rx.await.unwrap_or(StreamOutcome::Cancelled(0))
    }
}

struct MeteredStream {
    inner: ByteStream,
    delivered: u64,
    limit: Option<u64>,
    tx: Option<oneshot::Sender<StreamOutcome>>,
    done: bool,
}

impl MeteredStream {
    fn finish(&mut self, outcome: StreamOutcome) {
        self.done = true;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Stream for MeteredStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.delivered += chunk.len() as u64;
                if let Some(limit) = this.limit {
                    if this.delivered > limit {
                        let delivered = this.delivered;
                        this.finish(StreamOutcome::Overflowed(delivered));
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "size cap exceeded",
                        ))));
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let delivered = this.delivered;
                this.finish(StreamOutcome::Cancelled(delivered));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                let delivered = this.delivered;
                this.finish(StreamOutcome::Completed(delivered));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        let delivered = self.delivered;
        if self.tx.is_some() {
            self.finish(StreamOutcome::Cancelled(delivered));
        }
    }
}

/// Wrap a stream so the bytes pulled through it are counted.
///
/// Used on cache-hit serving so usage reflects bytes actually delivered.
pub fn counting(inner: ByteStream) -> (ByteStream, DeliveryReceipt) {
    metered(inner, None)
}

/// Wrap a stream with a hard byte cap.
///
/// Chunks pass through unchanged until the cumulative count would exceed
/// `max_size`; the stream then errors and the receipt resolves with
/// [`StreamOutcome::Overflowed`].
pub fn limited(inner: ByteStream, max_size: u64) -> (ByteStream, DeliveryReceipt) {
    metered(inner, Some(max_size))
}

fn metered(inner: ByteStream, limit: Option<u64>) -> (ByteStream, DeliveryReceipt) {
    let (tx, rx) = oneshot::channel();
    let stream = MeteredStream {
        inner,
        delivered: 0,
        limit,
        tx: Some(tx),
        done: false,
    };
    (Box::pin(stream), DeliveryReceipt { rx })
}

/// Split one stream into two independent consumers.
///
/// Each branch gets every chunk through its own bounded channel. When one
/// receiver is dropped the other keeps receiving; when both are gone the
/// driver stops pulling from the source. The returned driver future must
/// be spawned for the branches to make progress.
pub fn tee(mut source: ByteStream, buffer_chunks: usize) -> (ByteStream, ByteStream, TeeDriver) {
    let (tx_a, mut rx_a) = mpsc::channel::<io::Result<Bytes>>(buffer_chunks.max(1));
    let (tx_b, mut rx_b) = mpsc::channel::<io::Result<Bytes>>(buffer_chunks.max(1));

    let driver: TeeDriver = Box::pin(async move {
        let mut a_open = true;
        let mut b_open = true;
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    if a_open && tx_a.send(Ok(chunk.clone())).await.is_err() {
                        a_open = false;
                    }
                    if b_open && tx_b.send(Ok(chunk)).await.is_err() {
                        b_open = false;
                    }
                    if !a_open && !b_open {
                        return;
                    }
                }
                Err(e) => {
                    let kind = e.kind();
                    let msg = e.to_string();
                    if a_open {
                        let _ = tx_a.send(Err(io::Error::new(kind, msg.clone()))).await;
                    }
                    if b_open {
                        let _ = tx_b.send(Err(io::Error::new(kind, msg))).await;
                    }
                    return;
                }
            }
        }
    });

    let stream_a: ByteStream = Box::pin(futures_util::stream::poll_fn(move |cx| {
        rx_a.poll_recv(cx)
    }));
    let stream_b: ByteStream = Box::pin(futures_util::stream::poll_fn(move |cx| {
        rx_b.poll_recv(cx)
    }));
    (stream_a, stream_b, driver)
}

/// A stream over a single chunk of bytes
pub fn once_stream(bytes: Bytes) -> ByteStream {
    Box::pin(futures_util::stream::iter(std::iter::once(Ok(bytes))))
}

/// Pull a whole stream into memory. Test and memory-store helper.
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}
