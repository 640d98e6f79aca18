//! Command line interface for the `wirestream` loopback demo.
//!
//! Kept free of crate imports so `build.rs` can render the man page from
//! the same definition.

use clap::{Parser, ValueEnum};

/// Metadata encoding selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// JSON with the wire field names.
    Json,
    /// Compact bincode.
    Bincode,
}

/// Command line arguments for the `wirestream` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wirestream",
    version,
    about = "Send a request with streamed content over an in-memory connection"
)]
pub struct Cli {
    /// Size of each content stream in bytes.
    #[arg(short, long, default_value_t = 100_000)]
    pub body_size: usize,
    /// Largest body a single frame may carry.
    #[arg(short, long, default_value_t = 4096)]
    pub frame_size: usize,
    /// Number of content streams attached to the request.
    #[arg(short, long, default_value_t = 1)]
    pub streams: usize,
    /// Send content without declaring its length up front.
    #[arg(long)]
    pub unknown_length: bool,
    /// Metadata encoding shared by both ends.
    #[arg(long, value_enum, default_value_t = Format::Json)]
    pub format: Format,
}
