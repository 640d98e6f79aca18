//! Application-facing request, response and content stream types.
//!
//! Outgoing messages ([`StreamingRequest`], [`StreamingResponse`]) own their
//! content bodies and are split into one metadata payload plus one `Stream`
//! payload per attached [`ContentStream`]. Incoming messages
//! ([`ReceivedRequest`], [`ReceivedResponse`]) expose each attached stream as
//! a [`ReceivedStream`] that can be read while its frames are still arriving.

use std::io;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::{
    body::PayloadBody,
    config::SerializationFormat,
    disassembler::PayloadDisassembler,
    header::PayloadId,
    metadata::{RequestPayload, ResponsePayload, StreamDescription},
    stream::{PayloadStream, StreamAbort},
};

/// One content stream attached to an outgoing message.
#[derive(Debug)]
pub struct ContentStream {
    id: PayloadId,
    content_type: Option<String>,
    body: PayloadBody,
}

impl ContentStream {
    /// Wrap a body under a fresh id.
    #[must_use]
    pub fn new(body: PayloadBody) -> Self {
        Self {
            id: PayloadId::new(),
            content_type: None,
            body,
        }
    }

    /// Content stream backed by an in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self { Self::new(PayloadBody::from_bytes(bytes)) }

    /// Content stream backed by a reader of known or unknown length.
    #[must_use]
    pub fn from_reader<R>(reader: R, length: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(PayloadBody::from_reader(reader, length))
    }

    /// Set the MIME type advertised for the content.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the stream id.
    #[must_use]
    pub fn with_id(mut self, id: PayloadId) -> Self {
        self.id = id;
        self
    }

    /// Id the content is sent under.
    #[must_use]
    pub fn id(&self) -> PayloadId { self.id }

    /// Advertised MIME type.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    /// Content length, if known.
    #[must_use]
    pub fn length(&self) -> Option<u64> { self.body.length() }

    /// Metadata entry describing this stream.
    #[must_use]
    pub fn description(&self) -> StreamDescription {
        StreamDescription::new(self.id, self.content_type.clone(), self.body.length())
    }

    /// Disassembler sending this stream's content.
    #[must_use]
    pub fn into_disassembler(self) -> PayloadDisassembler {
        PayloadDisassembler::stream(self.id, self.body)
    }
}

fn describe(streams: &[ContentStream]) -> Vec<StreamDescription> {
    streams.iter().map(ContentStream::description).collect()
}

/// Outgoing request.
///
/// # Examples
///
/// ```
/// use wirestream::{ContentStream, StreamingRequest};
///
/// let request = StreamingRequest::post("/api/messages")
///     .with_stream(ContentStream::from_bytes("hello").with_content_type("text/plain"));
/// assert_eq!(request.verb(), "POST");
/// assert_eq!(request.streams().len(), 1);
/// ```
#[derive(Debug)]
pub struct StreamingRequest {
    verb: String,
    path: String,
    streams: Vec<ContentStream>,
}

impl StreamingRequest {
    /// Request with an arbitrary verb.
    #[must_use]
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            streams: Vec::new(),
        }
    }

    /// `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self { Self::new("GET", path) }

    /// `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self { Self::new("POST", path) }

    /// `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self { Self::new("PUT", path) }

    /// `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self { Self::new("DELETE", path) }

    /// Attach a content stream.
    #[must_use]
    pub fn with_stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Attach an in-memory body as a content stream.
    #[must_use]
    pub fn with_body(self, bytes: impl Into<Bytes>) -> Self {
        self.with_stream(ContentStream::from_bytes(bytes))
    }

    /// Request verb.
    #[must_use]
    pub fn verb(&self) -> &str { &self.verb }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// Attached content streams.
    #[must_use]
    pub fn streams(&self) -> &[ContentStream] { &self.streams }

    pub(crate) fn into_disassemblers(
        self,
        id: PayloadId,
        format: SerializationFormat,
    ) -> (PayloadDisassembler, Vec<ContentStream>) {
        let payload = RequestPayload {
            verb: self.verb,
            path: self.path,
            streams: describe(&self.streams),
        };
        (PayloadDisassembler::request(id, payload, format), self.streams)
    }
}

/// Outgoing response.
#[derive(Debug)]
pub struct StreamingResponse {
    status_code: u16,
    streams: Vec<ContentStream>,
}

impl StreamingResponse {
    /// Response with the given status code.
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            streams: Vec::new(),
        }
    }

    /// `200 OK` response.
    #[must_use]
    pub fn ok() -> Self { Self::new(200) }

    /// `404 Not Found` response.
    #[must_use]
    pub fn not_found() -> Self { Self::new(404) }

    /// `500 Internal Server Error` response.
    #[must_use]
    pub fn internal_error() -> Self { Self::new(500) }

    /// Attach a content stream.
    #[must_use]
    pub fn with_stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Attach an in-memory body as a content stream.
    #[must_use]
    pub fn with_body(self, bytes: impl Into<Bytes>) -> Self {
        self.with_stream(ContentStream::from_bytes(bytes))
    }

    /// Status code.
    #[must_use]
    pub fn status_code(&self) -> u16 { self.status_code }

    /// Attached content streams.
    #[must_use]
    pub fn streams(&self) -> &[ContentStream] { &self.streams }

    pub(crate) fn into_disassemblers(
        self,
        request_id: PayloadId,
        format: SerializationFormat,
    ) -> (PayloadDisassembler, Vec<ContentStream>) {
        let payload = ResponsePayload {
            status_code: self.status_code,
            streams: describe(&self.streams),
        };
        (
            PayloadDisassembler::response(request_id, payload, format),
            self.streams,
        )
    }
}

/// Content stream attached to an incoming message.
#[derive(Clone, Debug)]
pub struct ReceivedStream {
    /// Stream id.
    pub id: PayloadId,
    /// Advertised MIME type.
    pub content_type: Option<String>,
    /// Advertised length.
    pub length: Option<u64>,
    stream: PayloadStream,
}

impl ReceivedStream {
    pub(crate) fn new(description: StreamDescription, id: PayloadId, stream: PayloadStream) -> Self {
        Self {
            id,
            content_type: description.content_type,
            length: description.length,
            stream,
        }
    }

    /// Handle to the underlying stream.
    #[must_use]
    pub fn stream(&self) -> &PayloadStream { &self.stream }

    /// Take the underlying stream.
    #[must_use]
    pub fn into_stream(self) -> PayloadStream { self.stream }

    /// Read the whole content.
    ///
    /// # Errors
    ///
    /// Returns the [`StreamAbort`] reason if the stream is aborted first.
    pub async fn read_to_end(&self) -> Result<Bytes, StreamAbort> { self.stream.read_to_end().await }

    /// Read the whole content as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the stream is aborted or the content is not
    /// valid UTF-8.
    pub async fn read_to_string(&self) -> io::Result<String> {
        let bytes = self.read_to_end().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Request received from the peer.
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    /// Request id; the response must be sent under the same id.
    pub id: PayloadId,
    /// Request verb.
    pub verb: String,
    /// Request path.
    pub path: String,
    /// Attached content streams.
    pub streams: Vec<ReceivedStream>,
}

impl ReceivedRequest {
    /// First attached stream, conventionally the body.
    #[must_use]
    pub fn body(&self) -> Option<&ReceivedStream> { self.streams.first() }
}

/// Response received from the peer.
#[derive(Clone, Debug)]
pub struct ReceivedResponse {
    /// Id of the request this response answers.
    pub id: PayloadId,
    /// Status code.
    pub status_code: u16,
    /// Attached content streams.
    pub streams: Vec<ReceivedStream>,
}

impl ReceivedResponse {
    /// First attached stream, conventionally the body.
    #[must_use]
    pub fn body(&self) -> Option<&ReceivedStream> { self.streams.first() }

    /// Whether the status code is in the `2xx` range.
    #[must_use]
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status_code) }
}
