//! Conversion of one logical message into a sequence of frames.
//!
//! [`PayloadDisassembler`] is a closed set of message kinds sharing one
//! capability: produce a [`PayloadBody`] with a known or unknown length.
//! [`PayloadDisassembler::disassemble`] then drives that body through a
//! [`PayloadSender`] one frame at a time, waiting for each frame to be
//! flushed before cutting the next, until a frame with the end flag set has
//! been written.
//!
//! A failure part way through leaves the frames already written in place;
//! the peer only learns about it through a cancellation or a disconnect.

use thiserror::Error;
use tracing::debug;

use crate::{
    body::PayloadBody,
    config::SerializationFormat,
    header::{FrameHeader, PayloadId, PayloadType},
    metadata::{MetadataError, RequestPayload, ResponsePayload},
    sender::{PayloadSender, SendError},
};

/// Errors raised while disassembling a payload.
#[derive(Debug, Error)]
pub enum DisassemblyError {
    /// The metadata record could not be serialized.
    #[error("failed to serialize payload metadata: {0}")]
    Metadata(#[from] MetadataError),
    /// A frame could not be sent.
    #[error("failed to send frame: {0}")]
    Send(#[from] SendError),
}

/// Target of a cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelScope {
    /// Abort the payload with the given id.
    Stream(PayloadId),
    /// Abort every in-flight payload on the connection.
    All,
}

/// Summary of a completed disassembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisassemblyOutcome {
    /// Id the frames were sent under.
    pub id: PayloadId,
    /// Kind of payload sent.
    pub payload_type: PayloadType,
    /// Number of frames written.
    pub frames_sent: usize,
    /// Number of body bytes written across all frames.
    pub bytes_sent: u64,
}

impl DisassemblyOutcome {
    fn record(&mut self, header: &FrameHeader) {
        self.frames_sent += 1;
        self.bytes_sent += u64::from(header.payload_length);
    }
}

/// One logical message ready to be cut into frames.
#[derive(Debug)]
pub enum PayloadDisassembler {
    /// Request metadata; attached streams are sent separately.
    Request {
        /// Id of the request.
        id: PayloadId,
        /// Verb, path and stream descriptions.
        payload: RequestPayload,
        /// Metadata encoding.
        format: SerializationFormat,
    },
    /// Response metadata, addressed by the id of the request it answers.
    Response {
        /// Id of the request being answered.
        id: PayloadId,
        /// Status code and stream descriptions.
        payload: ResponsePayload,
        /// Metadata encoding.
        format: SerializationFormat,
    },
    /// Raw content of one attached stream, addressed by the stream's id.
    Stream {
        /// Id of the content stream.
        id: PayloadId,
        /// Content bytes.
        body: PayloadBody,
    },
    /// Zero-length cancellation.
    Cancel(CancelScope),
}

impl PayloadDisassembler {
    /// Disassembler for request metadata.
    #[must_use]
    pub fn request(id: PayloadId, payload: RequestPayload, format: SerializationFormat) -> Self {
        Self::Request {
            id,
            payload,
            format,
        }
    }

    /// Disassembler for response metadata.
    #[must_use]
    pub fn response(id: PayloadId, payload: ResponsePayload, format: SerializationFormat) -> Self {
        Self::Response {
            id,
            payload,
            format,
        }
    }

    /// Disassembler for one content stream.
    #[must_use]
    pub fn stream(id: PayloadId, body: PayloadBody) -> Self { Self::Stream { id, body } }

    /// Disassembler cancelling one payload.
    #[must_use]
    pub fn cancel_stream(id: PayloadId) -> Self { Self::Cancel(CancelScope::Stream(id)) }

    /// Disassembler cancelling every payload on the connection.
    #[must_use]
    pub fn cancel_all() -> Self { Self::Cancel(CancelScope::All) }

    /// Kind of payload this disassembler produces.
    #[must_use]
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::Request { .. } => PayloadType::Request,
            Self::Response { .. } => PayloadType::Response,
            Self::Stream { .. } => PayloadType::Stream,
            Self::Cancel(CancelScope::Stream(_)) => PayloadType::CancelStream,
            Self::Cancel(CancelScope::All) => PayloadType::CancelAll,
        }
    }

    /// Id the frames are sent under.
    ///
    /// Connection-wide cancellation uses the nil id.
    #[must_use]
    pub fn id(&self) -> PayloadId {
        match self {
            Self::Request { id, .. }
            | Self::Response { id, .. }
            | Self::Stream { id, .. }
            | Self::Cancel(CancelScope::Stream(id)) => *id,
            Self::Cancel(CancelScope::All) => PayloadId::nil(),
        }
    }

    /// Produce the byte body to send.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if request or response metadata cannot be
    /// serialized.
    pub fn get_body(self) -> Result<PayloadBody, MetadataError> {
        match self {
            Self::Request {
                payload, format, ..
            } => format.serialize(&payload).map(PayloadBody::from_bytes),
            Self::Response {
                payload, format, ..
            } => format.serialize(&payload).map(PayloadBody::from_bytes),
            Self::Stream { body, .. } => Ok(body),
            Self::Cancel(_) => Ok(PayloadBody::empty()),
        }
    }

    /// Send the whole payload through `sender`.
    ///
    /// Resolves once the final frame has been flushed. A zero-length body
    /// produces a single empty frame with the end flag set.
    ///
    /// # Errors
    ///
    /// Returns [`DisassemblyError`] if the metadata cannot be serialized or
    /// a frame cannot be sent. Frames written before the failure are not
    /// retracted.
    pub async fn disassemble(self, sender: &PayloadSender) -> Result<DisassemblyOutcome, DisassemblyError> {
        let payload_type = self.payload_type();
        let id = self.id();
        let mut body = self.get_body()?;
        let mut outcome = DisassemblyOutcome {
            id,
            payload_type,
            frames_sent: 0,
            bytes_sent: 0,
        };

        match body.length() {
            Some(total) => {
                let max = sender.max_frame_payload() as u64;
                loop {
                    let len = (total - outcome.bytes_sent).min(max);
                    let end = outcome.bytes_sent + len >= total;
                    let payload_length = u32::try_from(len).map_err(|_| SendError::PayloadTooLarge {
                        size: usize::try_from(len).unwrap_or(usize::MAX),
                        max: sender.max_frame_payload(),
                    })?;
                    let header = FrameHeader::new(payload_type, id, payload_length, end);
                    let sent = sender.send_payload(header, &mut body, true).await?;
                    outcome.record(&sent);
                    if sent.end {
                        break;
                    }
                }
            }
            None => loop {
                let header = FrameHeader::new(payload_type, id, 0, false);
                let sent = sender.send_payload(header, &mut body, false).await?;
                outcome.record(&sent);
                if sent.end {
                    break;
                }
            },
        }

        debug!(
            %id,
            %payload_type,
            frames = outcome.frames_sent,
            bytes = outcome.bytes_sent,
            "payload sent"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "disassembler_tests.rs"]
mod tests;
