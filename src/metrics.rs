//! Metric helpers for `wirestream`.
//!
//! This module defines metric names and small helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking frames written or read.
pub const FRAMES_TOTAL: &str = "wirestream_frames_total";
/// Name of the counter tracking frame body bytes written or read.
pub const PAYLOAD_BYTES_TOTAL: &str = "wirestream_payload_bytes_total";
/// Name of the gauge tracking assemblers awaiting their final frame.
pub const ASSEMBLERS_ACTIVE: &str = "wirestream_assemblers_active";
/// Name of the counter tracking assemblers evicted for inactivity.
pub const ASSEMBLERS_EVICTED: &str = "wirestream_assemblers_evicted_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "wirestream_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the transport.
    Inbound,
    /// Frames written to the transport.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record one frame and its body size for the given direction.
pub fn record_frame(direction: Direction, body_len: usize) {
    #[cfg(feature = "metrics")]
    {
        counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
        counter!(PAYLOAD_BYTES_TOTAL, "direction" => direction.as_str())
            .increment(body_len as u64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (direction, body_len);
}

/// Publish the number of active assemblers.
#[allow(
    clippy::cast_precision_loss,
    reason = "gauge values are approximate by nature"
)]
pub fn set_active_assemblers(count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(ASSEMBLERS_ACTIVE).set(count as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record assemblers dropped by the eviction sweep.
pub fn inc_evicted(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(ASSEMBLERS_EVICTED).increment(count as u64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record an error occurrence labelled with its category.
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
