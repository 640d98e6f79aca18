//! Producer/consumer byte buffer shared between an assembler and its
//! consumer.
//!
//! [`PayloadStream`] is a cheap, cloneable handle. The receiving side appends
//! frame bodies as they arrive while any number of handles read from a single
//! shared cursor. Reads suspend until bytes arrive or the stream is completed
//! or aborted:
//!
//! - bytes are delivered exactly once, in append order;
//! - after [`PayloadStream::mark_complete`] and a full drain, reads return
//!   `0`;
//! - after [`PayloadStream::abort`], buffered bytes are discarded and every
//!   read fails with the [`StreamAbort`] reason.
//!
//! The buffer is unbounded so the receiver never stalls every other payload
//! on one slow consumer.

use std::{
    collections::VecDeque,
    future::poll_fn,
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

use crate::header::PayloadId;

/// Reason a stream was terminated before completing normally.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamAbort {
    /// The peer cancelled the payload.
    #[error("payload cancelled by peer")]
    Cancelled,
    /// The connection failed before the payload completed.
    #[error("connection lost before payload completed: {reason}")]
    Disconnected {
        /// Description of the connection failure.
        reason: String,
    },
    /// No frame arrived for the payload within the configured idle limit.
    #[error("payload evicted after {idle:?} without progress")]
    Evicted {
        /// Time since the last frame arrived.
        idle: Duration,
    },
    /// The peer sent frames that break the payload's framing rules.
    #[error("payload rejected: {reason}")]
    Malformed {
        /// Description of the violation.
        reason: String,
    },
}

impl StreamAbort {
    /// Build a [`StreamAbort::Disconnected`] from any displayable cause.
    pub fn disconnected(reason: impl std::fmt::Display) -> Self {
        Self::Disconnected {
            reason: reason.to_string(),
        }
    }

    /// Whether the abort was an explicit cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled) }
}

impl From<StreamAbort> for io::Error {
    fn from(abort: StreamAbort) -> Self {
        let kind = match abort {
            StreamAbort::Cancelled => io::ErrorKind::ConnectionAborted,
            StreamAbort::Disconnected { .. } => io::ErrorKind::UnexpectedEof,
            StreamAbort::Evicted { .. } => io::ErrorKind::TimedOut,
            StreamAbort::Malformed { .. } => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, abort)
    }
}

/// Errors returned by [`PayloadStream::append`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AppendError {
    /// The stream already received its final bytes.
    #[error("stream already complete")]
    Completed,
    /// The stream was aborted.
    #[error("stream aborted: {0}")]
    Aborted(StreamAbort),
}

#[derive(Debug)]
enum Status {
    Open,
    Complete,
    Aborted(StreamAbort),
}

#[derive(Debug)]
struct State {
    chunks: VecDeque<Bytes>,
    appended: u64,
    consumed: u64,
    status: Status,
    wakers: Vec<Waker>,
}

impl State {
    fn register(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    fn copy_into(&mut self, dst: &mut [u8]) -> usize {
        let mut written = 0;
        while written < dst.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            written += n;
        }
        self.consumed += written as u64;
        written
    }
}

#[derive(Debug)]
struct Shared {
    id: PayloadId,
    state: Mutex<State>,
}

/// Shared handle to one payload's byte stream.
///
/// Clones share the same buffer and read cursor.
#[derive(Clone, Debug)]
pub struct PayloadStream {
    shared: Arc<Shared>,
}

impl PayloadStream {
    /// Create an empty, open stream for `id`.
    #[must_use]
    pub fn new(id: PayloadId) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(State {
                    chunks: VecDeque::new(),
                    appended: 0,
                    consumed: 0,
                    status: Status::Open,
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Id of the payload this stream carries.
    #[must_use]
    pub fn id(&self) -> PayloadId { self.shared.id }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether two handles refer to the same underlying stream.
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool { Arc::ptr_eq(&self.shared, &other.shared) }

    /// Append bytes for consumers to read.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError`] if the stream is already complete or aborted.
    pub fn append(&self, bytes: Bytes) -> Result<(), AppendError> {
        let wakers = {
            let mut state = self.lock();
            match &state.status {
                Status::Open => {}
                Status::Complete => return Err(AppendError::Completed),
                Status::Aborted(reason) => return Err(AppendError::Aborted(reason.clone())),
            }
            if bytes.is_empty() {
                return Ok(());
            }
            state.appended += bytes.len() as u64;
            state.chunks.push_back(bytes);
            std::mem::take(&mut state.wakers)
        };
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Mark the stream complete; readers drain what remains and then see EOF.
    ///
    /// Returns `false` if the stream was already complete or aborted.
    pub fn mark_complete(&self) -> bool { self.finish(Status::Complete) }

    /// Abort the stream, discarding buffered bytes and failing every read.
    ///
    /// Returns `false` if the stream was already complete or aborted, in
    /// which case nothing changes.
    pub fn abort(&self, reason: StreamAbort) -> bool { self.finish(Status::Aborted(reason)) }

    fn finish(&self, status: Status) -> bool {
        let wakers = {
            let mut state = self.lock();
            if !matches!(state.status, Status::Open) {
                return false;
            }
            if matches!(status, Status::Aborted(_)) {
                state.chunks.clear();
            }
            state.status = status;
            std::mem::take(&mut state.wakers)
        };
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    /// Total bytes appended so far.
    #[must_use]
    pub fn appended(&self) -> u64 { self.lock().appended }

    /// Total bytes read so far.
    #[must_use]
    pub fn consumed(&self) -> u64 { self.lock().consumed }

    /// Whether the final bytes have been appended.
    #[must_use]
    pub fn is_complete(&self) -> bool { matches!(self.lock().status, Status::Complete) }

    /// Abort reason, if the stream was aborted.
    #[must_use]
    pub fn abort_reason(&self) -> Option<StreamAbort> {
        match &self.lock().status {
            Status::Aborted(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Poll for bytes, copying as many as fit into `dst`.
    ///
    /// Resolves to `Ok(0)` only at end of stream (or for an empty `dst`).
    ///
    /// # Errors
    ///
    /// Resolves to the [`StreamAbort`] reason once the stream is aborted.
    pub fn poll_read_into(
        &self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
    ) -> Poll<Result<usize, StreamAbort>> {
        let mut state = self.lock();
        if let Status::Aborted(reason) = &state.status {
            return Poll::Ready(Err(reason.clone()));
        }
        if dst.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let n = state.copy_into(dst);
        if n > 0 || matches!(state.status, Status::Complete) {
            return Poll::Ready(Ok(n));
        }
        state.register(cx.waker());
        Poll::Pending
    }

    /// Poll for the next buffered chunk without copying.
    ///
    /// # Errors
    ///
    /// Resolves to the [`StreamAbort`] reason once the stream is aborted.
    pub fn poll_next_chunk(&self, cx: &mut Context<'_>) -> Poll<Result<Option<Bytes>, StreamAbort>> {
        let mut state = self.lock();
        if let Status::Aborted(reason) = &state.status {
            return Poll::Ready(Err(reason.clone()));
        }
        if let Some(chunk) = state.chunks.pop_front() {
            state.consumed += chunk.len() as u64;
            return Poll::Ready(Ok(Some(chunk)));
        }
        if matches!(state.status, Status::Complete) {
            return Poll::Ready(Ok(None));
        }
        state.register(cx.waker());
        Poll::Pending
    }

    /// Read up to `dst.len()` bytes, waiting until at least one is available
    /// or the stream ends.
    ///
    /// # Errors
    ///
    /// Returns the [`StreamAbort`] reason if the stream was aborted.
    pub async fn read(&self, dst: &mut [u8]) -> Result<usize, StreamAbort> {
        poll_fn(|cx| self.poll_read_into(cx, dst)).await
    }

    /// Wait for the next chunk; `None` marks end of stream.
    ///
    /// # Errors
    ///
    /// Returns the [`StreamAbort`] reason if the stream was aborted.
    pub async fn next_chunk(&self) -> Result<Option<Bytes>, StreamAbort> {
        poll_fn(|cx| self.poll_next_chunk(cx)).await
    }

    /// Synchronous variant of [`read`](Self::read) for consumers running on
    /// plain threads.
    ///
    /// Must not be called from within an async runtime worker.
    ///
    /// # Errors
    ///
    /// Returns the [`StreamAbort`] reason if the stream was aborted.
    pub fn blocking_read(&self, dst: &mut [u8]) -> Result<usize, StreamAbort> {
        futures::executor::block_on(self.read(dst))
    }

    /// Collect every remaining byte until the stream completes.
    ///
    /// # Errors
    ///
    /// Returns the [`StreamAbort`] reason if the stream is aborted first.
    pub async fn read_to_end(&self) -> Result<Bytes, StreamAbort> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl AsyncRead for PayloadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let dst = buf.initialize_unfilled();
        match self.poll_read_into(cx, dst) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(abort)) => Poll::Ready(Err(abort.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for PayloadStream {
    type Item = Result<Bytes, StreamAbort>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.poll_next_chunk(cx) {
            Poll::Ready(Ok(Some(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Ok(None)) => Poll::Ready(None),
            Poll::Ready(Err(abort)) => Poll::Ready(Some(Err(abort))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
