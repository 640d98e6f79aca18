//! Reassembly of one logical message from its frames.
//!
//! A [`PayloadAssembler`] owns the [`PayloadStream`] for one payload id and
//! appends frame bodies to it in arrival order. The [`AssemblerRegistry`]
//! maps ids to assemblers for a single connection.

use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;

use crate::{
    header::{PayloadId, PayloadType},
    stream::{AppendError, PayloadStream, StreamAbort},
};

mod registry;

pub use registry::{AssemblerRegistry, CompletedPayload, FrameOutcome};

/// Result of feeding a frame into a [`PayloadAssembler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblerStatus {
    /// More frames are expected.
    Incomplete,
    /// The frame carried the end flag.
    Complete,
}

/// Errors produced while assembling a payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    /// A frame arrived after the payload's final frame.
    #[error("payload {id} already received its final frame")]
    AlreadyComplete {
        /// Payload id.
        id: PayloadId,
    },
    /// The payload grew beyond the length its description declared.
    #[error("payload {id} exceeded its declared length: {received} > {declared}")]
    ContentLengthExceeded {
        /// Payload id.
        id: PayloadId,
        /// Declared length.
        declared: u64,
        /// Bytes received including the offending frame.
        received: u64,
    },
    /// A frame's type differs from the type the payload started with.
    #[error("payload {id} is a {expected} payload but received a {found} frame")]
    TypeMismatch {
        /// Payload id.
        id: PayloadId,
        /// Type of the first frame.
        expected: PayloadType,
        /// Type of the offending frame.
        found: PayloadType,
    },
    /// The payload's stream was already aborted.
    #[error("payload {id} was aborted: {reason}")]
    Aborted {
        /// Payload id.
        id: PayloadId,
        /// Reason the stream was aborted.
        reason: StreamAbort,
    },
}

/// Receiving side of one logical message.
#[derive(Debug)]
pub struct PayloadAssembler {
    id: PayloadId,
    payload_type: PayloadType,
    stream: PayloadStream,
    content_length: Option<u64>,
    received: u64,
    complete: bool,
    claimed: bool,
    last_activity: Instant,
}

impl PayloadAssembler {
    /// Create an assembler for a payload first seen at `now`.
    #[must_use]
    pub fn new(
        id: PayloadId,
        payload_type: PayloadType,
        content_length: Option<u64>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            payload_type,
            stream: PayloadStream::new(id),
            content_length,
            received: 0,
            complete: false,
            claimed: false,
            last_activity: now,
        }
    }

    /// Payload id.
    #[must_use]
    pub fn id(&self) -> PayloadId { self.id }

    /// Payload type fixed by the first frame.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType { self.payload_type }

    /// Declared content length, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> { self.content_length }

    /// Body bytes received so far.
    #[must_use]
    pub fn received(&self) -> u64 { self.received }

    /// Whether the final frame has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.complete }

    /// Instant the last frame arrived, or creation time if none has.
    #[must_use]
    pub fn last_activity(&self) -> Instant { self.last_activity }

    pub(crate) fn is_claimed(&self) -> bool { self.claimed }

    pub(crate) fn claim(&mut self, content_length: Option<u64>) {
        self.claimed = true;
        if self.content_length.is_none() {
            self.content_length = content_length;
        }
    }

    /// Return the stream consumers read from.
    ///
    /// Every call returns a handle to the same stream.
    #[must_use]
    pub fn get_payload_stream(&self) -> PayloadStream { self.stream.clone() }

    /// Append a frame body and, if `end` is set, complete the stream.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::AlreadyComplete`] for frames after the final
    /// one, [`AssemblyError::ContentLengthExceeded`] (aborting the stream)
    /// when the declared length is overrun, and [`AssemblyError::Aborted`] if
    /// the stream was already aborted.
    pub fn on_receive(
        &mut self,
        bytes: Bytes,
        end: bool,
        now: Instant,
    ) -> Result<AssemblerStatus, AssemblyError> {
        if self.complete {
            return Err(AssemblyError::AlreadyComplete { id: self.id });
        }
        let received = self.received + bytes.len() as u64;
        if let Some(declared) = self.content_length.filter(|declared| received > *declared) {
            let err = AssemblyError::ContentLengthExceeded {
                id: self.id,
                declared,
                received,
            };
            self.stream.abort(StreamAbort::Malformed {
                reason: err.to_string(),
            });
            return Err(err);
        }
        self.stream.append(bytes).map_err(|e| match e {
            AppendError::Completed => AssemblyError::AlreadyComplete { id: self.id },
            AppendError::Aborted(reason) => AssemblyError::Aborted { id: self.id, reason },
        })?;
        self.received = received;
        self.last_activity = now;
        if end {
            self.complete = true;
            self.stream.mark_complete();
            return Ok(AssemblerStatus::Complete);
        }
        Ok(AssemblerStatus::Incomplete)
    }

    /// Abort the stream because the peer cancelled the payload.
    ///
    /// Returns `false` if the stream had already finished.
    pub fn cancel(&self) -> bool { self.close(StreamAbort::Cancelled) }

    /// Abort the stream with `reason`.
    ///
    /// Returns `false` if the stream had already finished.
    pub fn close(&self, reason: StreamAbort) -> bool { self.stream.abort(reason) }
}
