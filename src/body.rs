//! Outbound payload bodies.
//!
//! A [`PayloadBody`] pairs an async byte source with an optional length.
//! When the length is known the sender cuts exact frames; when it is not,
//! the sender reads chunk by chunk and holds back one byte of lookahead so
//! the end flag is only set once the source reports exhaustion.

use std::{fmt, io, io::Cursor};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Byte source for one logical message.
pub struct PayloadBody {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    length: Option<u64>,
    held: Option<u8>,
}

impl PayloadBody {
    /// Body backed by an in-memory buffer of known length.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let length = Some(bytes.len() as u64);
        Self::from_reader(Cursor::new(bytes), length)
    }

    /// Body backed by an arbitrary reader.
    ///
    /// Pass `None` for `length` when the source size is not known in
    /// advance, for example a live generator.
    #[must_use]
    pub fn from_reader<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            length,
            held: None,
        }
    }

    /// Zero-length body.
    #[must_use]
    pub fn empty() -> Self { Self::from_bytes(Bytes::new()) }

    /// Declared body length, if known.
    #[must_use]
    pub fn length(&self) -> Option<u64> { self.length }

    /// Whether the length was declared up front.
    #[must_use]
    pub fn is_length_known(&self) -> bool { self.length.is_some() }

    /// Read exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the source ends early, or any error the
    /// source reports.
    pub(crate) async fn read_exact_chunk(&mut self, len: usize) -> io::Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::zeroed(len);
        let filled = self.take_held(&mut buf);
        self.reader.read_exact(&mut buf[filled..]).await?;
        Ok(buf.freeze())
    }

    /// Read up to `max` bytes and report whether the source is exhausted.
    ///
    /// A full chunk is followed by a one byte probe; a byte found by the
    /// probe is held back for the next call, so `true` is only returned
    /// once a read has actually come back empty.
    ///
    /// # Errors
    ///
    /// Returns any error the source reports.
    pub(crate) async fn read_lookahead_chunk(&mut self, max: usize) -> io::Result<(Bytes, bool)> {
        let mut buf = BytesMut::zeroed(max.max(1));
        let mut filled = self.take_held(&mut buf);
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                buf.truncate(filled);
                return Ok((buf.freeze(), true));
            }
            filled += n;
        }
        let mut probe = [0u8; 1];
        if self.reader.read(&mut probe).await? == 0 {
            return Ok((buf.freeze(), true));
        }
        self.held = Some(probe[0]);
        Ok((buf.freeze(), false))
    }

    fn take_held(&mut self, buf: &mut [u8]) -> usize {
        match (self.held.take(), buf.first_mut()) {
            (Some(byte), Some(slot)) => {
                *slot = byte;
                1
            }
            (held, _) => {
                self.held = held;
                0
            }
        }
    }
}

impl fmt::Debug for PayloadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadBody")
            .field("length", &self.length)
            .field("held", &self.held.is_some())
            .finish_non_exhaustive()
    }
}
