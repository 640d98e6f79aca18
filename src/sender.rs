//! Outbound frame funnel.
//!
//! [`PayloadSender`] is a cloneable handle used by any number of concurrent
//! disassemblies. Each call to [`PayloadSender::send_payload`] reads one
//! frame's worth of body bytes, queues the frame, and resolves once the
//! [`FrameWriter`] has written and flushed it. The writer owns the transport
//! and writes one frame at a time, so frames are never split or interleaved
//! at the byte level.
//!
//! Frames travel on two queues. Cancellation frames use the control queue
//! and are preferred by the writer, subject to
//! [`FairnessConfig`](crate::config::FairnessConfig) limits;
//! request, response and stream frames share the data queue in FIFO order.
//! Because a disassembly waits for each frame's acknowledgement before
//! producing the next, FIFO order interleaves concurrent payloads frame by
//! frame.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use futures::SinkExt;
use thiserror::Error;
use tokio::{
    io::AsyncWrite,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};
use tracing::{debug, warn};

use crate::{
    body::PayloadBody,
    codec::{PayloadFrame, PayloadFrameCodec},
    config::{FairnessConfig, SessionConfig},
    header::{FrameHeader, PayloadId, PayloadType},
    metrics::{self, Direction},
};

/// Errors raised while sending a frame.
#[derive(Debug, Error)]
pub enum SendError {
    /// The writer has stopped; the connection is closed or closing.
    #[error("connection closed")]
    Disconnected,
    /// Writing the frame to the transport failed.
    #[error("transport write failed: {0}")]
    Transport(#[source] io::Error),
    /// Reading the payload body failed.
    #[error("failed to read payload body: {0}")]
    Body(#[source] io::Error),
    /// The header announces a body larger than one frame may carry.
    #[error("frame payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Requested body size.
        size: usize,
        /// Largest body a frame may carry.
        max: usize,
    },
}

/// Queue a frame travels on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lane {
    Control,
    Data,
}

#[derive(Debug)]
struct Outbound {
    frame: PayloadFrame,
    ack: oneshot::Sender<Result<(), SendError>>,
}

#[derive(Debug)]
struct SenderInner {
    control_tx: mpsc::Sender<Outbound>,
    data_tx: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
    max_frame_payload: usize,
    unknown_length_chunk: usize,
    frames_sent: AtomicU64,
}

/// Cloneable handle for sending frames through a [`FrameWriter`].
#[derive(Clone, Debug)]
pub struct PayloadSender {
    inner: Arc<SenderInner>,
}

impl PayloadSender {
    /// Create a sender and the writer that drains it.
    ///
    /// The writer does nothing until [`FrameWriter::run`] is driven with a
    /// transport. Cancelling `shutdown` stops the writer and fails every
    /// queued frame with [`SendError::Disconnected`].
    #[must_use]
    pub fn new(config: &SessionConfig, shutdown: CancellationToken) -> (Self, FrameWriter) {
        let capacity = config.outbound_queue_capacity();
        let (control_tx, control_rx) = mpsc::channel(capacity);
        let (data_tx, data_rx) = mpsc::channel(capacity);
        let sender = Self {
            inner: Arc::new(SenderInner {
                control_tx,
                data_tx,
                shutdown: shutdown.clone(),
                max_frame_payload: config.max_frame_payload(),
                unknown_length_chunk: config.unknown_length_chunk(),
                frames_sent: AtomicU64::new(0),
            }),
        };
        let writer = FrameWriter {
            control_rx,
            data_rx,
            shutdown,
            codec: PayloadFrameCodec::new(config.max_frame_payload()),
            fairness: config.fairness(),
            burst: ControlBurst::default(),
        };
        (sender, writer)
    }

    /// Largest body a single frame may carry.
    #[must_use]
    pub fn max_frame_payload(&self) -> usize { self.inner.max_frame_payload }

    /// Read one frame's body from `body`, write the frame, and return the
    /// finalised header once the frame has been flushed.
    ///
    /// With `is_length_known`, exactly `header.payload_length` bytes are read
    /// and the header is sent unchanged. Otherwise up to one chunk is read,
    /// and the returned header carries the actual length and an end flag
    /// that is set only once the body is confirmed exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Body`] if the body cannot be read,
    /// [`SendError::PayloadTooLarge`] if the header exceeds the frame limit,
    /// and [`SendError::Disconnected`] or [`SendError::Transport`] if the
    /// frame cannot be written.
    pub async fn send_payload(
        &self,
        header: FrameHeader,
        body: &mut PayloadBody,
        is_length_known: bool,
    ) -> Result<FrameHeader, SendError> {
        if !self.is_connected() {
            return Err(SendError::Disconnected);
        }
        // A stalled body must not outlive the connection.
        let (header, bytes) = tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => return Err(SendError::Disconnected),
            res = self.read_frame_body(header, body, is_length_known) => res?,
        };
        self.enqueue(PayloadFrame::new(header, bytes)).await?;
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(header)
    }

    async fn read_frame_body(
        &self,
        header: FrameHeader,
        body: &mut PayloadBody,
        is_length_known: bool,
    ) -> Result<(FrameHeader, Bytes), SendError> {
        if is_length_known {
            self.check_size(header.body_len())?;
            let bytes = body
                .read_exact_chunk(header.body_len())
                .await
                .map_err(SendError::Body)?;
            return Ok((header, bytes));
        }
        let (bytes, end) = body
            .read_lookahead_chunk(self.inner.unknown_length_chunk)
            .await
            .map_err(SendError::Body)?;
        let payload_length = u32::try_from(bytes.len()).map_err(|_| SendError::PayloadTooLarge {
            size: bytes.len(),
            max: self.inner.max_frame_payload,
        })?;
        let header = FrameHeader {
            payload_length,
            end,
            ..header
        };
        Ok((header, bytes))
    }

    /// Frames sent through this sender and its clones so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 { self.inner.frames_sent.load(Ordering::Relaxed) }

    /// Send a `CancelStream` frame for `id` ahead of queued data frames.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Disconnected`] or [`SendError::Transport`] if the
    /// frame cannot be written.
    pub async fn send_cancel_stream(&self, id: PayloadId) -> Result<FrameHeader, SendError> {
        self.send_control(FrameHeader::new(PayloadType::CancelStream, id, 0, true))
            .await
    }

    /// Send a `CancelAll` frame ahead of queued data frames.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Disconnected`] or [`SendError::Transport`] if the
    /// frame cannot be written.
    pub async fn send_cancel_all(&self) -> Result<FrameHeader, SendError> {
        self.send_control(FrameHeader::new(PayloadType::CancelAll, PayloadId::nil(), 0, true))
            .await
    }

    async fn send_control(&self, header: FrameHeader) -> Result<FrameHeader, SendError> {
        self.send_payload(header, &mut PayloadBody::empty(), true).await
    }

    fn check_size(&self, size: usize) -> Result<(), SendError> {
        if size > self.inner.max_frame_payload {
            return Err(SendError::PayloadTooLarge {
                size,
                max: self.inner.max_frame_payload,
            });
        }
        Ok(())
    }

    async fn enqueue(&self, frame: PayloadFrame) -> Result<(), SendError> {
        let tx = if frame.header.payload_type.is_cancel() {
            &self.inner.control_tx
        } else {
            &self.inner.data_tx
        };
        let (ack, done) = oneshot::channel();
        tx.send(Outbound { frame, ack })
            .await
            .map_err(|_| SendError::Disconnected)?;
        tokio::select! {
            biased;
            res = done => res.unwrap_or(Err(SendError::Disconnected)),
            () = self.inner.shutdown.cancelled() => Err(SendError::Disconnected),
        }
    }

    /// Whether the writer is still accepting frames.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled() && !self.inner.data_tx.is_closed()
    }

    /// Stop the writer. Queued frames fail with [`SendError::Disconnected`].
    pub fn close(&self) { self.inner.shutdown.cancel(); }
}

/// Task owning the transport's write half.
#[derive(Debug)]
pub struct FrameWriter {
    control_rx: mpsc::Receiver<Outbound>,
    data_rx: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
    codec: PayloadFrameCodec,
    fairness: FairnessConfig,
    burst: ControlBurst,
}

impl FrameWriter {
    /// Write queued frames to `io` until shutdown or until every sender
    /// handle is dropped.
    ///
    /// A transport failure cancels the shutdown token so the rest of the
    /// session observes the disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Transport`] if a write fails.
    pub async fn run<W>(mut self, io: W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut framed = FramedWrite::new(io, self.codec);
        let result = loop {
            let Some((lane, outbound)) = self.next_frame().await else {
                break Ok(());
            };
            let header = outbound.frame.header;
            let body_len = outbound.frame.body.len();
            match framed.send(outbound.frame).await {
                Ok(()) => {
                    self.burst.record(lane);
                    metrics::record_frame(Direction::Outbound, body_len);
                    debug!(
                        id = %header.id,
                        payload_type = %header.payload_type,
                        payload_length = header.payload_length,
                        end = header.end,
                        "frame sent"
                    );
                    let _ = outbound.ack.send(Ok(()));
                }
                Err(e) => {
                    warn!(error = %e, id = %header.id, "transport write failed");
                    metrics::inc_errors("transport");
                    let cause = io::Error::new(e.kind(), e.to_string());
                    let _ = outbound.ack.send(Err(SendError::Transport(cause)));
                    self.shutdown.cancel();
                    break Err(SendError::Transport(e));
                }
            }
        };
        self.control_rx.close();
        self.data_rx.close();
        if result.is_ok() {
            if let Err(e) = SinkExt::<PayloadFrame>::close(&mut framed).await {
                debug!(error = %e, "failed to shut down transport writer");
            }
        }
        result
    }

    async fn next_frame(&mut self) -> Option<(Lane, Outbound)> {
        if self.burst.exhausted(&self.fairness) {
            if let Ok(outbound) = self.data_rx.try_recv() {
                return Some((Lane::Data, outbound));
            }
        }
        let mut control_closed = false;
        let mut data_closed = false;
        loop {
            if control_closed && data_closed {
                return None;
            }
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return None,
                res = self.control_rx.recv(), if !control_closed => match res {
                    Some(outbound) => return Some((Lane::Control, outbound)),
                    None => control_closed = true,
                },
                res = self.data_rx.recv(), if !data_closed => match res {
                    Some(outbound) => return Some((Lane::Data, outbound)),
                    None => data_closed = true,
                },
            }
        }
    }
}

/// Run of control frames written since the last data frame.
#[derive(Debug, Default)]
struct ControlBurst {
    len: usize,
    since: Option<Instant>,
}

impl ControlBurst {
    fn record(&mut self, lane: Lane) {
        match lane {
            Lane::Control => {
                self.len += 1;
                self.since.get_or_insert_with(Instant::now);
            }
            Lane::Data => *self = Self::default(),
        }
    }

    /// Whether the data lane is owed the next turn under `limits`.
    fn exhausted(&self, limits: &FairnessConfig) -> bool {
        let by_count =
            limits.max_control_before_data != 0 && self.len >= limits.max_control_before_data;
        let by_time = match (limits.time_slice, self.since) {
            (Some(slice), Some(since)) => since.elapsed() >= slice,
            _ => false,
        };
        by_count || by_time
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
