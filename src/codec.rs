//! Frame codec for the payload wire format.
//!
//! [`PayloadFrameCodec`] splits a byte stream into [`PayloadFrame`]s and
//! writes them back out. A frame is a fixed [`FrameHeader`] followed by
//! exactly `payload_length` body bytes; there is no other delimiter, so a
//! malformed header loses the frame boundary for good.
//!
//! # Error Handling
//!
//! Failures are reported through the structured [`CodecError`] taxonomy and
//! converted into `io::Error` at the `tokio_util` boundary. Use
//! [`CodecError::from_io`] to recover the structured form.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::header::{FrameHeader, HEADER_LEN, LENGTH_OFFSET};

pub mod error;

pub use error::{CodecError, EofError, FramingError};

/// Smallest accepted maximum frame payload.
///
/// Configured payload limits are clamped to at least this value so metadata
/// records of a reasonable size always fit in a handful of frames.
pub const MIN_FRAME_PAYLOAD: usize = 64;

/// Largest accepted maximum frame payload (16 MiB).
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum frame payload.
pub const DEFAULT_FRAME_PAYLOAD: usize = 4096;

pub(crate) fn clamp_frame_payload(value: usize) -> usize {
    value.clamp(MIN_FRAME_PAYLOAD, MAX_FRAME_PAYLOAD)
}

/// One frame: a header and the body bytes it announces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadFrame {
    /// Frame envelope.
    pub header: FrameHeader,
    /// Frame body; its length always equals `header.payload_length`.
    pub body: Bytes,
}

impl PayloadFrame {
    /// Construct a frame.
    #[must_use]
    pub fn new(header: FrameHeader, body: Bytes) -> Self { Self { header, body } }

    /// Total encoded size of the frame.
    #[must_use]
    pub fn encoded_len(&self) -> usize { HEADER_LEN + self.body.len() }
}

/// Codec translating between bytes and [`PayloadFrame`]s.
#[derive(Clone, Copy, Debug)]
pub struct PayloadFrameCodec {
    max_payload_length: usize,
}

impl PayloadFrameCodec {
    /// Construct a codec accepting bodies up to `max_payload_length` bytes.
    ///
    /// The limit is clamped to
    /// [`MIN_FRAME_PAYLOAD`]`..=`[`MAX_FRAME_PAYLOAD`].
    #[must_use]
    pub fn new(max_payload_length: usize) -> Self {
        Self {
            max_payload_length: clamp_frame_payload(max_payload_length),
        }
    }

    /// Return the maximum accepted body length.
    #[must_use]
    pub fn max_payload_length(&self) -> usize { self.max_payload_length }

    fn check_length(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_payload_length {
            return Err(FramingError::OversizedFrame {
                size,
                max: self.max_payload_length,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for PayloadFrameCodec {
    fn default() -> Self { Self::new(DEFAULT_FRAME_PAYLOAD) }
}

impl Decoder for PayloadFrameCodec {
    type Item = PayloadFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }
        let header = FrameHeader::decode(src)
            .map_err(|e| CodecError::Framing(FramingError::InvalidHeader(e)))?;
        let body_len = header.body_len();
        self.check_length(body_len)?;

        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let body = src.split_to(body_len).freeze();
        Ok(Some(PayloadFrame::new(header, body)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Clean close: nothing left at a frame boundary.
        if src.is_empty() {
            return Ok(None);
        }
        Err(build_eof_error(src))
    }
}

/// Classify leftover bytes at EOF as a truncated header or truncated body.
fn build_eof_error(src: &BytesMut) -> io::Error {
    let bytes_received = src.len();
    let expected = src
        .get(LENGTH_OFFSET..LENGTH_OFFSET + 4)
        .filter(|_| bytes_received >= HEADER_LEN)
        .and_then(|slice| <[u8; 4]>::try_from(slice).ok())
        .map(|bytes| u32::from_be_bytes(bytes) as usize);

    match expected {
        Some(expected) => CodecError::Eof(EofError::MidFrame {
            bytes_received: bytes_received.saturating_sub(HEADER_LEN),
            expected,
        })
        .into(),
        None => CodecError::Eof(EofError::MidHeader {
            bytes_received,
            header_size: HEADER_LEN,
        })
        .into(),
    }
}

impl Encoder<PayloadFrame> for PayloadFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let declared = item.header.body_len();
        if declared != item.body.len() {
            return Err(CodecError::Framing(FramingError::LengthMismatch {
                declared,
                actual: item.body.len(),
            })
            .into());
        }
        self.check_length(declared)?;
        dst.reserve(item.encoded_len());
        item.header.encode(dst);
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}
