//! Metadata records carried in request and response payload bodies.
//!
//! A request body describes the verb, path and attached content streams; a
//! response body describes the status code and attached content streams.
//! Each attached stream travels separately as a `Stream` payload whose id is
//! the one listed in its [`StreamDescription`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::PayloadId;

/// Errors raised while encoding or decoding metadata records.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// JSON encoding or decoding failed.
    #[error("invalid JSON metadata: {0}")]
    Json(#[source] serde_json::Error),
    /// `bincode` encoding failed.
    #[error("failed to encode metadata: {0}")]
    BincodeEncode(#[source] bincode::error::EncodeError),
    /// `bincode` decoding failed.
    #[error("failed to decode metadata: {0}")]
    BincodeDecode(#[source] bincode::error::DecodeError),
    /// A stream description carries an id that is not a UUID.
    #[error("stream description has invalid id {id:?}")]
    InvalidStreamId {
        /// Offending id text.
        id: String,
    },
}

/// Description of one content stream attached to a request or response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    /// Id of the `Stream` payload carrying the content.
    pub id: String,
    /// MIME type of the content, if any.
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    /// Length of the content in bytes, when known in advance.
    #[serde(default)]
    pub length: Option<u64>,
}

impl StreamDescription {
    /// Describe a stream.
    #[must_use]
    pub fn new(id: PayloadId, content_type: Option<String>, length: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            content_type,
            length,
        }
    }

    /// Parse the described stream id.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidStreamId`] if the id is not a UUID.
    pub fn payload_id(&self) -> Result<PayloadId, MetadataError> {
        self.id.parse().map_err(|_| MetadataError::InvalidStreamId {
            id: self.id.clone(),
        })
    }
}

/// Body of a `Request` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Request verb such as `GET` or `POST`.
    pub verb: String,
    /// Request path.
    pub path: String,
    /// Attached content streams.
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

/// Body of a `Response` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Status code of the response.
    pub status_code: u16,
    /// Attached content streams.
    #[serde(default)]
    pub streams: Vec<StreamDescription>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::SerializationFormat;

    fn sample_request() -> RequestPayload {
        RequestPayload {
            verb: "POST".into(),
            path: "/api/messages".into(),
            streams: vec![StreamDescription::new(
                PayloadId::new(),
                Some("application/json".into()),
                Some(42),
            )],
        }
    }

    #[test]
    fn json_uses_wire_field_names() {
        let response = ResponsePayload {
            status_code: 200,
            streams: vec![StreamDescription {
                id: "abc".into(),
                content_type: Some("text/plain".into()),
                length: None,
            }],
        };
        let json = SerializationFormat::Json
            .serialize(&response)
            .expect("serialize response");
        let value: serde_json::Value = serde_json::from_slice(&json).expect("valid json");
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["streams"][0]["id"], "abc");
        assert_eq!(value["streams"][0]["type"], "text/plain");
    }

    #[test]
    fn json_accepts_missing_streams() {
        let request: RequestPayload = SerializationFormat::Json
            .deserialize(br#"{"verb":"GET","path":"/"}"#)
            .expect("decode request");
        assert!(request.streams.is_empty());
    }

    #[rstest]
    #[case(SerializationFormat::Json)]
    #[case(SerializationFormat::Bincode)]
    fn request_metadata_round_trips(#[case] format: SerializationFormat) {
        let request = sample_request();
        let bytes = format.serialize(&request).expect("serialize");
        let decoded: RequestPayload = format.deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, request);
    }

    #[test]
    fn rejects_non_uuid_stream_id() {
        let description = StreamDescription {
            id: "not-a-uuid".into(),
            content_type: None,
            length: None,
        };
        assert!(matches!(
            description.payload_id(),
            Err(MetadataError::InvalidStreamId { .. })
        ));
    }

    #[test]
    fn truncated_json_is_an_error() {
        let result: Result<RequestPayload, _> =
            SerializationFormat::Json.deserialize(br#"{"verb":"GE"#);
        assert!(matches!(result, Err(MetadataError::Json(_))));
    }
}
