//! Shared utilities for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::task::JoinHandle;
use wirestream::{
    IncomingRequests,
    ReceivedRequest,
    RequestHandler,
    StreamingResponse,
    StreamingSession,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Answer with every request stream concatenated into one body.
///
/// A stream that fails to arrive produces a `500` naming the failure.
pub async fn echo(request: ReceivedRequest) -> StreamingResponse {
    let mut body = BytesMut::new();
    for stream in &request.streams {
        match stream.read_to_end().await {
            Ok(bytes) => body.extend_from_slice(&bytes),
            Err(e) => return StreamingResponse::internal_error().with_body(e.to_string()),
        }
    }
    StreamingResponse::ok().with_body(body.freeze())
}

/// Serve `incoming` with `handler` on a background task.
pub fn spawn_server<H>(server: &StreamingSession, incoming: IncomingRequests, handler: H) -> JoinHandle<()>
where
    H: RequestHandler,
{
    let server = server.clone();
    tokio::spawn(async move { server.serve(incoming, Arc::new(handler)).await })
}

/// Concatenate every stream of a received response.
pub async fn response_body(response: &wirestream::ReceivedResponse) -> TestResult<Bytes> {
    let mut body = BytesMut::new();
    for stream in &response.streams {
        body.extend_from_slice(&stream.read_to_end().await?);
    }
    Ok(body.freeze())
}
