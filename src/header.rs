//! Fixed-size frame header shared by every payload on the wire.
//!
//! Each frame starts with a 22 byte envelope:
//!
//! | Field            | Size | Encoding                  |
//! |------------------|------|---------------------------|
//! | payload type     | 1    | ASCII tag                 |
//! | payload id       | 16   | UUID bytes                |
//! | payload length   | 4    | big-endian `u32`          |
//! | end of payload   | 1    | `0` or `1`                |
//!
//! The header carries everything a receiver needs to find the next frame
//! boundary and to route the body to the right assembler.

use bytes::{Buf, BufMut};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of bytes occupied by an encoded [`FrameHeader`].
pub const HEADER_LEN: usize = TYPE_LEN + ID_LEN + LENGTH_LEN + END_LEN;

const TYPE_LEN: usize = 1;
const ID_LEN: usize = 16;
const LENGTH_LEN: usize = 4;
const END_LEN: usize = 1;

/// Offset of the payload length field inside an encoded header.
pub(crate) const LENGTH_OFFSET: usize = TYPE_LEN + ID_LEN;

/// Kind of logical message a frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum PayloadType {
    /// Request metadata (verb, path and stream descriptions).
    #[display("request")]
    Request,
    /// Response metadata (status code and stream descriptions).
    #[display("response")]
    Response,
    /// Raw bytes of one content stream.
    #[display("stream")]
    Stream,
    /// Abort a single in-flight payload.
    #[display("cancel-stream")]
    CancelStream,
    /// Abort every in-flight payload on the connection.
    #[display("cancel-all")]
    CancelAll,
}

impl PayloadType {
    /// Return the single byte tag used on the wire.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Request => b'A',
            Self::Response => b'B',
            Self::Stream => b'S',
            Self::CancelStream => b'C',
            Self::CancelAll => b'X',
        }
    }

    /// Map a wire tag back to its payload type.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' => Some(Self::Request),
            b'B' => Some(Self::Response),
            b'S' => Some(Self::Stream),
            b'C' => Some(Self::CancelStream),
            b'X' => Some(Self::CancelAll),
            _ => None,
        }
    }

    /// Whether frames of this type carry a cancellation signal.
    #[must_use]
    pub const fn is_cancel(self) -> bool { matches!(self, Self::CancelStream | Self::CancelAll) }
}

/// Identifier shared by every frame of one logical message.
///
/// # Examples
///
/// ```
/// use wirestream::PayloadId;
///
/// let id = PayloadId::new();
/// assert_eq!(PayloadId::from_bytes(*id.as_bytes()), id);
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct PayloadId(Uuid);

impl PayloadId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self { Self(Uuid::new_v4()) }

    /// The all-zero identifier used by connection-wide control frames.
    #[must_use]
    pub const fn nil() -> Self { Self(Uuid::nil()) }

    /// Build an identifier from its raw wire bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self { Self(Uuid::from_bytes(bytes)) }

    /// Borrow the raw wire bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] { self.0.as_bytes() }

    /// Return the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid { self.0 }
}

impl Default for PayloadId {
    fn default() -> Self { Self::new() }
}

impl std::str::FromStr for PayloadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s).map(Self) }
}

/// Errors produced while decoding a [`FrameHeader`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than [`HEADER_LEN`] bytes were supplied.
    #[error("frame header truncated: have {have} of {HEADER_LEN} bytes")]
    Truncated {
        /// Bytes available to the decoder.
        have: usize,
    },
    /// The type byte does not name a known payload type.
    #[error("unknown payload type tag {tag:#04x}")]
    UnknownType {
        /// Offending tag byte.
        tag: u8,
    },
    /// The end byte was neither `0` nor `1`.
    #[error("invalid end-of-payload flag {value:#04x}")]
    InvalidEndFlag {
        /// Offending flag byte.
        value: u8,
    },
}

/// Envelope describing one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Kind of logical message the frame belongs to.
    pub payload_type: PayloadType,
    /// Logical message the frame belongs to.
    pub id: PayloadId,
    /// Number of body bytes following the header.
    pub payload_length: u32,
    /// Set on the final frame of a logical message.
    pub end: bool,
}

impl FrameHeader {
    /// Construct a header.
    #[must_use]
    pub const fn new(payload_type: PayloadType, id: PayloadId, payload_length: u32, end: bool) -> Self {
        Self {
            payload_type,
            id,
            payload_length,
            end,
        }
    }

    /// Return the body length as `usize`.
    #[must_use]
    pub const fn body_len(&self) -> usize { self.payload_length as usize }

    /// Write the header into `dst`.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.payload_type.tag());
        dst.put_slice(self.id.as_bytes());
        dst.put_u32(self.payload_length);
        dst.put_u8(u8::from(self.end));
    }

    /// Encode the header into a fixed array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut cursor = &mut out[..];
        self.encode(&mut cursor);
        out
    }

    /// Decode a header from the first [`HEADER_LEN`] bytes of `src`.
    ///
    /// Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if `src` is too short or carries an unknown
    /// type tag or malformed end flag.
    pub fn decode(src: &[u8]) -> Result<Self, HeaderError> {
        let Some(mut buf) = src.get(..HEADER_LEN) else {
            return Err(HeaderError::Truncated { have: src.len() });
        };
        let tag = buf.get_u8();
        let payload_type = PayloadType::from_tag(tag).ok_or(HeaderError::UnknownType { tag })?;
        let mut id = [0u8; ID_LEN];
        buf.copy_to_slice(&mut id);
        let payload_length = buf.get_u32();
        let end = match buf.get_u8() {
            0 => false,
            1 => true,
            value => return Err(HeaderError::InvalidEndFlag { value }),
        };
        Ok(Self::new(payload_type, PayloadId::from_bytes(id), payload_length, end))
    }
}
