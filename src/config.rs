//! Session configuration.
//!
//! [`SessionConfig`] gathers the knobs shared by the sender, receiver and
//! session layers. Builder methods follow the `with_*` convention and clamp
//! values into their supported ranges rather than failing.
//!
//! [`SerializationFormat`] selects how request and response metadata is
//! encoded inside a payload body. Both peers must agree on the format.

use std::time::Duration;

use bincode::config;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    codec::{DEFAULT_FRAME_PAYLOAD, clamp_frame_payload},
    metadata::MetadataError,
};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Serialization formats supported for payload metadata.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializationFormat {
    /// UTF-8 JSON with camel-case field names.
    #[default]
    Json,
    /// `bincode` with its standard configuration.
    Bincode,
}

impl SerializationFormat {
    /// Serialize a metadata record into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns a [`MetadataError`] if serialization fails.
    pub fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>, MetadataError> {
        match self {
            Self::Json => serde_json::to_vec(value).map_err(MetadataError::Json),
            Self::Bincode => bincode::serde::encode_to_vec(value, config::standard())
                .map_err(MetadataError::BincodeEncode),
        }
    }

    /// Deserialize a metadata record from a byte slice.
    ///
    /// A leading UTF-8 byte-order mark is skipped for JSON input.
    ///
    /// # Errors
    ///
    /// Returns a [`MetadataError`] if the bytes do not decode.
    pub fn deserialize<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, MetadataError> {
        match self {
            Self::Json => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                serde_json::from_slice(bytes).map_err(MetadataError::Json)
            }
            Self::Bincode => bincode::serde::decode_from_slice(bytes, config::standard())
                .map(|(value, _)| value)
                .map_err(MetadataError::BincodeDecode),
        }
    }
}

/// Thresholds controlling when queued control frames yield to data frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FairnessConfig {
    /// Number of consecutive control frames written before a data frame is
    /// given a turn. `0` disables the counter.
    pub max_control_before_data: usize,
    /// Optional time slice after which control traffic yields.
    pub time_slice: Option<Duration>,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            max_control_before_data: 8,
            time_slice: None,
        }
    }
}

/// Configuration shared by every component of a streaming session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wirestream::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_max_frame_payload(8192)
///     .with_request_timeout(Some(Duration::from_secs(30)));
/// assert_eq!(config.max_frame_payload(), 8192);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    max_frame_payload: usize,
    unknown_length_chunk: usize,
    assembler_ttl: Option<Duration>,
    eviction_interval: Duration,
    outbound_queue_capacity: usize,
    event_capacity: usize,
    request_timeout: Option<Duration>,
    fairness: FairnessConfig,
    metadata_format: SerializationFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_FRAME_PAYLOAD,
            unknown_length_chunk: DEFAULT_FRAME_PAYLOAD,
            assembler_ttl: Some(Duration::from_secs(300)),
            eviction_interval: Duration::from_secs(30),
            outbound_queue_capacity: 64,
            event_capacity: 16,
            request_timeout: None,
            fairness: FairnessConfig::default(),
            metadata_format: SerializationFormat::Json,
        }
    }
}

impl SessionConfig {
    /// Set the largest body carried by a single frame.
    ///
    /// The value is clamped to the codec's supported range and the
    /// unknown-length chunk size is reduced to fit if necessary.
    #[must_use]
    pub fn with_max_frame_payload(mut self, bytes: usize) -> Self {
        self.max_frame_payload = clamp_frame_payload(bytes);
        self.unknown_length_chunk = self.unknown_length_chunk.min(self.max_frame_payload);
        self
    }

    /// Set the chunk size used when a body's length is not known up front.
    ///
    /// Clamped to `1..=max_frame_payload`.
    #[must_use]
    pub fn with_unknown_length_chunk(mut self, bytes: usize) -> Self {
        self.unknown_length_chunk = bytes.clamp(1, self.max_frame_payload);
        self
    }

    /// Set how long an idle assembler survives before it is evicted.
    ///
    /// `None` disables eviction.
    #[must_use]
    pub fn with_assembler_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.assembler_ttl = ttl;
        self
    }

    /// Set how often the receiver sweeps for idle assemblers.
    #[must_use]
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the capacity of each outbound frame queue.
    #[must_use]
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of the received payload channel.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set how long [`send_request`](crate::StreamingSession::send_request)
    /// waits for the correlated response. `None` waits indefinitely.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the control/data fairness thresholds.
    #[must_use]
    pub fn with_fairness(mut self, fairness: FairnessConfig) -> Self {
        self.fairness = fairness;
        self
    }

    /// Set the metadata serialization format.
    #[must_use]
    pub fn with_metadata_format(mut self, format: SerializationFormat) -> Self {
        self.metadata_format = format;
        self
    }

    /// Largest body carried by a single frame.
    #[must_use]
    pub fn max_frame_payload(&self) -> usize { self.max_frame_payload }

    /// Chunk size used for bodies of unknown length.
    #[must_use]
    pub fn unknown_length_chunk(&self) -> usize { self.unknown_length_chunk }

    /// Idle lifetime of an assembler, if eviction is enabled.
    #[must_use]
    pub fn assembler_ttl(&self) -> Option<Duration> { self.assembler_ttl }

    /// Period of the eviction sweep.
    #[must_use]
    pub fn eviction_interval(&self) -> Duration { self.eviction_interval }

    /// Capacity of each outbound frame queue.
    #[must_use]
    pub fn outbound_queue_capacity(&self) -> usize { self.outbound_queue_capacity }

    /// Capacity of the received payload channel.
    #[must_use]
    pub fn event_capacity(&self) -> usize { self.event_capacity }

    /// Response wait limit for outbound requests.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> { self.request_timeout }

    /// Control/data fairness thresholds.
    #[must_use]
    pub fn fairness(&self) -> FairnessConfig { self.fairness }

    /// Metadata serialization format.
    #[must_use]
    pub fn metadata_format(&self) -> SerializationFormat { self.metadata_format }
}
