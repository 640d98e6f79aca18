//! Content sources with awkward timing or failures.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};

/// Yields at most `step` bytes per read and reports `Pending` between reads.
#[derive(Debug)]
pub struct TrickleReader {
    data: Bytes,
    step: usize,
    ready: bool,
}

impl TrickleReader {
    /// Trickle `data` out `step` bytes at a time.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, step: usize) -> Self {
        Self {
            data: data.into(),
            step: step.max(1),
            ready: false,
        }
    }
}

impl AsyncRead for TrickleReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;
        let n = self.step.min(self.data.len()).min(buf.remaining());
        buf.put_slice(&self.data[..n]);
        self.data.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Yields `data` and then fails every read.
#[derive(Debug)]
pub struct FailingReader {
    data: Bytes,
}

impl FailingReader {
    /// Fail once `data` has been read.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self { Self { data: data.into() } }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.data.is_empty() {
            return Poll::Ready(Err(io::Error::other("content source failed")));
        }
        let n = self.data.len().min(buf.remaining());
        buf.put_slice(&self.data[..n]);
        self.data.advance(n);
        Poll::Ready(Ok(()))
    }
}
