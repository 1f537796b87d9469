//! Per-stream byte accounting (spec §4.1 "Per-stream accounting", §3
//! `UserConnection` byte counters).
//!
//! Every byte crossing each direction is counted through a small
//! wrapper that increments a counter and stamps the owning tunnel's
//! activity instant, generalizing the teacher's per-message relay
//! bookkeeping in `server/src/handlers.rs` into a byte-level wrapper
//! that works for arbitrary stream contents, not just JSON frames.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::registry::AgentTunnel;

/// Cumulative byte counters for one `UserConnection` (spec §3).
#[derive(Default)]
pub struct ByteCounters {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl ByteCounters {
    pub fn snapshot(&self) -> (u64, u64) {
        (self.bytes_in.load(Ordering::Relaxed), self.bytes_out.load(Ordering::Relaxed))
    }
}

/// Wraps any `AsyncRead + AsyncWrite` stream, counting bytes in each
/// direction and touching the owning tunnel's activity instant on
/// every successful read/write (spec §4.1 item 2).
pub struct CountedStream<S> {
    inner: S,
    counters: Arc<ByteCounters>,
    tunnel: Arc<AgentTunnel>,
}

impl<S> CountedStream<S> {
    pub fn new(inner: S, counters: Arc<ByteCounters>, tunnel: Arc<AgentTunnel>) -> Self {
        Self { inner, counters, tunnel }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountedStream<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = buf.filled().len() - before;
            if read > 0 {
                self.counters.bytes_in.fetch_add(read as u64, Ordering::Relaxed);
                self.tunnel.touch();
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountedStream<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &result {
            if *n > 0 {
                self.counters.bytes_out.fetch_add(*n as u64, Ordering::Relaxed);
                self.tunnel.touch();
            }
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
