//! Capture of frames written by a [`PayloadSender`].

use std::io;

use bytes::BytesMut;
use futures::TryStreamExt;
use tokio::{io::duplex, task::JoinHandle};
use tokio_util::{
    codec::{Decoder, FramedRead},
    sync::CancellationToken,
};
use wirestream::{PayloadFrame, PayloadFrameCodec, PayloadSender, SendError, SessionConfig};

use crate::transport::DEFAULT_CAPACITY;

/// A sender whose frames are decoded on the far side of a pipe.
#[derive(Debug)]
pub struct SenderCapture {
    /// Sender feeding the captured writer.
    pub sender: PayloadSender,
    writer: JoinHandle<Result<(), SendError>>,
    frames: JoinHandle<io::Result<Vec<PayloadFrame>>>,
}

impl SenderCapture {
    /// Spawn a writer for `config` and start decoding what it writes.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(config: &SessionConfig) -> Self {
        let (client, server) = duplex(DEFAULT_CAPACITY);
        let (sender, writer) = PayloadSender::new(config, CancellationToken::new());
        let codec = PayloadFrameCodec::new(config.max_frame_payload());
        Self {
            sender,
            writer: tokio::spawn(writer.run(client)),
            frames: tokio::spawn(async move { FramedRead::new(server, codec).try_collect::<Vec<_>>().await }),
        }
    }

    /// Stop the writer and return every frame it wrote, in write order.
    ///
    /// Every clone of [`SenderCapture::sender`] must be dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer failed or the output does not decode.
    pub async fn finish(self) -> io::Result<Vec<PayloadFrame>> {
        drop(self.sender);
        self.writer
            .await
            .map_err(io::Error::other)?
            .map_err(io::Error::other)?;
        self.frames.await.map_err(io::Error::other)?
    }
}

/// Decode every frame in `bytes`.
///
/// # Errors
///
/// Returns an error if `bytes` holds a malformed or truncated frame.
pub fn decode_frames(bytes: &[u8], max_frame_payload: usize) -> io::Result<Vec<PayloadFrame>> {
    let mut codec = PayloadFrameCodec::new(max_frame_payload);
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode_eof(&mut buf)? {
        frames.push(frame);
    }
    Ok(frames)
}
