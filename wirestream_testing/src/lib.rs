//! Utilities for exercising `wirestream` over in-memory transports.
//!
//! Sessions and senders run on `tokio::io::duplex` pipes so tests never
//! open sockets. Frames written by a sender can be captured and decoded for
//! assertions, and the reader types simulate slow or failing content
//! sources.
//!
//! ```rust
//! use wirestream::SessionConfig;
//! use wirestream_testing::SenderCapture;
//!
//! # async fn example() -> std::io::Result<()> {
//! let capture = SenderCapture::spawn(&SessionConfig::default());
//! let frames = capture.finish().await?;
//! assert!(frames.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod macros;
pub mod payloads;
pub mod readers;
pub mod transport;

pub use capture::{SenderCapture, decode_frames};
pub use payloads::pattern;
pub use readers::{FailingReader, TrickleReader};
pub use transport::{DEFAULT_CAPACITY, DEFAULT_WAIT, SessionPair, session_config, session_pair};
