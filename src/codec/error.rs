//! Error types for the frame codec.
//!
//! The taxonomy separates wire-level framing problems from premature
//! end-of-stream conditions and transport I/O failures. Every variant is
//! fatal for the connection: once a frame boundary is lost the byte stream
//! cannot be resynchronised.

use std::io;

use thiserror::Error;

use crate::header::HeaderError;

/// Framing-level errors occurring while locating frame boundaries.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The header announces a body larger than the configured maximum.
    #[error("frame payload exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Body size announced by the header.
        size: usize,
        /// Maximum accepted body size.
        max: usize,
    },

    /// The header bytes could not be decoded.
    #[error("invalid frame header: {0}")]
    InvalidHeader(#[from] HeaderError),

    /// An outbound body does not match the length its header declares.
    #[error("frame body length {actual} does not match header length {declared}")]
    LengthMismatch {
        /// Length carried by the header.
        declared: usize,
        /// Length of the body handed to the encoder.
        actual: usize,
    },
}

/// End-of-stream conditions distinguishing clean closure from truncation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// The peer closed the transport part way through a header.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Size of a complete header.
        header_size: usize,
    },

    /// The peer closed the transport part way through a frame body.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte frame body received")]
    MidFrame {
        /// Body bytes received before EOF.
        bytes_received: usize,
        /// Body length announced by the header.
        expected: usize,
    },
}

/// Top-level codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Wire-level frame structure problem.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport closed mid-frame.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns the error category as a string for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
            Self::Eof(_) => "eof",
        }
    }

    /// Recover a structured codec error from an `io::Error` produced by
    /// [`PayloadFrameCodec`](super::PayloadFrameCodec).
    ///
    /// Errors that did not originate in the codec are wrapped as
    /// [`CodecError::Io`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        let structured = err
            .get_ref()
            .and_then(|inner| {
                inner
                    .downcast_ref::<FramingError>()
                    .map(|e| Self::Framing(*e))
                    .or_else(|| inner.downcast_ref::<EofError>().map(|e| Self::Eof(*e)))
            });
        structured.unwrap_or(Self::Io(err))
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Framing(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CodecError::Eof(e) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
