//! Inbound frame loop.
//!
//! [`PayloadReceiver`] owns the transport's read half. It decodes frames,
//! routes data frames to the [`AssemblerRegistry`], applies cancellations,
//! and publishes a [`ReceivedPayload`] event whenever a request or response
//! completes. Content streams named by a request or response are claimed
//! from the registry before the event is published, so a consumer can read
//! them while their frames are still arriving.
//!
//! When the transport closes or a frame cannot be decoded, every payload
//! still in flight is aborted with [`StreamAbort::Disconnected`] and the
//! shared shutdown token is cancelled.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use thiserror::Error;
use tokio::{
    io::AsyncRead,
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, info, warn};

use crate::{
    assembler::{AssemblerRegistry, CompletedPayload, FrameOutcome},
    codec::{CodecError, PayloadFrame, PayloadFrameCodec},
    config::{SerializationFormat, SessionConfig},
    header::PayloadType,
    message::{ReceivedRequest, ReceivedResponse, ReceivedStream},
    metadata::{MetadataError, RequestPayload, ResponsePayload, StreamDescription},
    metrics::{self, Direction},
    stream::StreamAbort,
};

/// A completed request or response.
#[derive(Clone, Debug)]
pub enum ReceivedPayload {
    /// A request from the peer.
    Request(ReceivedRequest),
    /// A response to one of our requests.
    Response(ReceivedResponse),
}

/// Errors that end the receive loop.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The peer sent bytes that do not form a valid frame.
    #[error("malformed frame: {0}")]
    Codec(#[source] CodecError),
    /// Reading from the transport failed.
    #[error("transport read failed: {0}")]
    Transport(#[source] io::Error),
}

impl ReceiveError {
    /// Category label used for logs and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Codec(e) => e.error_type(),
            Self::Transport(_) => "transport",
        }
    }
}

impl From<io::Error> for ReceiveError {
    fn from(err: io::Error) -> Self {
        match CodecError::from_io(err) {
            CodecError::Io(e) => Self::Transport(e),
            other => Self::Codec(other),
        }
    }
}

#[derive(Debug, Error)]
enum EventError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Body(#[from] StreamAbort),
}

/// Task owning the transport's read half.
pub struct PayloadReceiver<R> {
    frames: FramedRead<R, PayloadFrameCodec>,
    registry: Arc<AssemblerRegistry>,
    events: mpsc::Sender<ReceivedPayload>,
    format: SerializationFormat,
    sweep_every: Option<Duration>,
    shutdown: CancellationToken,
}

impl<R> PayloadReceiver<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a receiver reading frames from `io`.
    ///
    /// The eviction sweep runs only when `registry` was built with a TTL and
    /// `config` carries one.
    #[must_use]
    pub fn new(
        io: R,
        config: &SessionConfig,
        registry: Arc<AssemblerRegistry>,
        events: mpsc::Sender<ReceivedPayload>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            frames: FramedRead::new(io, PayloadFrameCodec::new(config.max_frame_payload())),
            registry,
            events,
            format: config.metadata_format(),
            sweep_every: config.assembler_ttl().map(|_| config.eviction_interval()),
            shutdown,
        }
    }

    /// Registry the receiver feeds.
    #[must_use]
    pub fn registry(&self) -> &Arc<AssemblerRegistry> { &self.registry }

    /// Process frames until the transport closes, a frame cannot be
    /// decoded, or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError`] if decoding or reading fails. A clean close
    /// between frames returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ReceiveError> {
        let mut sweep = self.sweep_every.map(|every| {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let result = loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break Ok(()),
                () = tick(sweep.as_mut()) => {
                    let evicted = self.registry.purge_expired();
                    if evicted > 0 {
                        debug!(evicted, "eviction sweep finished");
                    }
                }
                next = self.frames.next() => match next {
                    Some(Ok(frame)) => self.on_frame(frame).await,
                    Some(Err(e)) => break Err(ReceiveError::from(e)),
                    None => break Ok(()),
                },
            }
        };

        let reason = match &result {
            Ok(()) => StreamAbort::disconnected("connection closed"),
            Err(e) => StreamAbort::disconnected(e),
        };
        let aborted = self.registry.fail_all(&reason);
        match &result {
            Ok(()) => info!(aborted, "receive loop finished"),
            Err(e) => {
                warn!(error = %e, aborted, "receive loop failed");
                metrics::inc_errors(e.error_type());
            }
        }
        self.shutdown.cancel();
        result
    }

    async fn on_frame(&mut self, frame: PayloadFrame) {
        let header = frame.header;
        metrics::record_frame(Direction::Inbound, frame.body.len());
        debug!(
            id = %header.id,
            payload_type = %header.payload_type,
            payload_length = header.payload_length,
            end = header.end,
            "frame received"
        );
        match header.payload_type {
            PayloadType::CancelStream => {
                if self.registry.cancel(header.id) {
                    debug!(id = %header.id, "payload cancelled by peer");
                } else {
                    debug!(id = %header.id, "ignoring cancel for unknown or completed payload");
                }
            }
            PayloadType::CancelAll => {
                let cancelled = self.registry.cancel_all();
                debug!(cancelled, "all payloads cancelled by peer");
            }
            PayloadType::Request | PayloadType::Response | PayloadType::Stream => {
                match self.registry.on_frame(&header, frame.body, Instant::now()) {
                    Ok(FrameOutcome::Buffered) => {}
                    Ok(FrameOutcome::Discarded) => {
                        debug!(id = %header.id, "dropping frame for cancelled payload");
                    }
                    Ok(FrameOutcome::Completed(done)) => self.on_complete(done).await,
                    Err(e) => {
                        warn!(id = %header.id, error = %e, "frame rejected");
                        metrics::inc_errors("assembly");
                    }
                }
            }
        }
    }

    async fn on_complete(&mut self, done: CompletedPayload) {
        if done.payload_type == PayloadType::Stream {
            return;
        }
        let id = done.id;
        match self.decode_event(done).await {
            Ok(event) => {
                metrics::set_active_assemblers(self.registry.active_len());
                self.publish(event).await;
            }
            Err(e) => {
                warn!(%id, error = %e, "failed to decode payload metadata");
                metrics::inc_errors("metadata");
            }
        }
    }

    async fn decode_event(&mut self, done: CompletedPayload) -> Result<ReceivedPayload, EventError> {
        let bytes = done.stream.read_to_end().await?;
        let now = Instant::now();
        let event = if done.payload_type == PayloadType::Request {
            let payload: RequestPayload = self.format.deserialize(&bytes)?;
            ReceivedPayload::Request(ReceivedRequest {
                id: done.id,
                verb: payload.verb,
                path: payload.path,
                streams: self.claim_streams(payload.streams, now),
            })
        } else {
            let payload: ResponsePayload = self.format.deserialize(&bytes)?;
            ReceivedPayload::Response(ReceivedResponse {
                id: done.id,
                status_code: payload.status_code,
                streams: self.claim_streams(payload.streams, now),
            })
        };
        Ok(event)
    }

    fn claim_streams(&self, descriptions: Vec<StreamDescription>, now: Instant) -> Vec<ReceivedStream> {
        descriptions
            .into_iter()
            .filter_map(|description| {
                let id = match description.payload_id() {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, "skipping stream with invalid id");
                        return None;
                    }
                };
                match self.registry.claim_stream(id, description.length, now) {
                    Ok(stream) => Some(ReceivedStream::new(description, id, stream)),
                    Err(e) => {
                        warn!(%id, error = %e, "failed to claim stream");
                        None
                    }
                }
            })
            .collect()
    }

    async fn publish(&mut self, event: ReceivedPayload) {
        tokio::select! {
            biased;
            res = self.events.send(event) => {
                if res.is_err() {
                    debug!("no listener for received payloads; dropping event");
                }
            }
            () = self.shutdown.cancelled() => {}
        }
    }
}

async fn tick(sweep: Option<&mut Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
