//! Unit tests for [`PayloadReceiver`].

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use rstest::rstest;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::FramedWrite;
use tracing::Instrument;
use tracing_test::traced_test;

use super::*;
use crate::{
    codec::FramingError,
    header::{FrameHeader, HeaderError, PayloadId},
};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    frames: FramedWrite<DuplexStream, PayloadFrameCodec>,
    events: mpsc::Receiver<ReceivedPayload>,
    registry: Arc<AssemblerRegistry>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), ReceiveError>>,
}

impl Harness {
    fn spawn(config: SessionConfig) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let registry = Arc::new(AssemblerRegistry::new(config.assembler_ttl()));
        let (tx, events) = mpsc::channel(config.event_capacity());
        let shutdown = CancellationToken::new();
        let receiver = PayloadReceiver::new(server, &config, registry.clone(), tx, shutdown.clone());
        Self {
            frames: FramedWrite::new(client, PayloadFrameCodec::new(config.max_frame_payload())),
            events,
            registry,
            shutdown,
            task: tokio::spawn(receiver.run().in_current_span()),
        }
    }

    async fn send(&mut self, payload_type: PayloadType, id: PayloadId, body: &[u8], end: bool) {
        let len = u32::try_from(body.len()).expect("test body fits");
        let frame = PayloadFrame::new(
            FrameHeader::new(payload_type, id, len, end),
            Bytes::copy_from_slice(body),
        );
        self.frames.send(frame).await.expect("write frame");
    }

    async fn send_request(&mut self, id: PayloadId, streams: Vec<StreamDescription>) {
        let metadata = SerializationFormat::Json
            .serialize(&RequestPayload {
                verb: "POST".into(),
                path: "/upload".into(),
                streams,
            })
            .expect("serialize request");
        self.send(PayloadType::Request, id, &metadata, true).await;
    }

    async fn next_event(&mut self) -> ReceivedPayload {
        timeout(WAIT, self.events.recv())
            .await
            .expect("event should arrive")
            .expect("receiver running")
    }

    async fn finish(self) -> Result<(), ReceiveError> {
        drop(self.frames);
        timeout(WAIT, self.task)
            .await
            .expect("receiver should stop")
            .expect("receiver task should not panic")
    }
}

fn expect_request(event: ReceivedPayload) -> ReceivedRequest {
    match event {
        ReceivedPayload::Request(request) => request,
        ReceivedPayload::Response(_) => panic!("expected a request"),
    }
}

#[rstest]
#[tokio::test]
async fn request_exposes_stream_still_in_flight() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let request_id = PayloadId::new();
    let stream_id = PayloadId::new();

    harness
        .send_request(
            request_id,
            vec![StreamDescription::new(stream_id, Some("text/plain".into()), Some(6))],
        )
        .await;
    let request = expect_request(harness.next_event().await);
    assert_eq!(request.id, request_id);
    assert_eq!(request.verb, "POST");
    assert_eq!(request.path, "/upload");
    let body = request.body().expect("one stream").clone();
    assert_eq!(body.content_type.as_deref(), Some("text/plain"));

    harness.send(PayloadType::Stream, stream_id, b"abc", false).await;
    harness.send(PayloadType::Stream, stream_id, b"def", true).await;
    let bytes = timeout(WAIT, body.read_to_end())
        .await
        .expect("stream completes")
        .expect("not aborted");
    assert_eq!(bytes, Bytes::from_static(b"abcdef"));
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn stream_sent_before_request_is_claimed() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let stream_id = PayloadId::new();
    harness.send(PayloadType::Stream, stream_id, b"early", true).await;
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, None)])
        .await;

    let request = expect_request(harness.next_event().await);
    let body = request.body().expect("one stream");
    assert_eq!(body.read_to_string().await.expect("text"), "early");
    assert!(!harness.registry.contains(stream_id));
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn response_event_carries_status() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let id = PayloadId::new();
    let metadata = SerializationFormat::Json
        .serialize(&ResponsePayload {
            status_code: 404,
            streams: Vec::new(),
        })
        .expect("serialize response");
    let (head, tail) = metadata.split_at(metadata.len() / 2);
    harness.send(PayloadType::Response, id, head, false).await;
    harness.send(PayloadType::Response, id, tail, true).await;

    let ReceivedPayload::Response(response) = harness.next_event().await else {
        panic!("expected a response");
    };
    assert_eq!(response.id, id);
    assert_eq!(response.status_code, 404);
    assert!(!response.is_success());
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn cancel_stream_aborts_consumer() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let stream_id = PayloadId::new();
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, None)])
        .await;
    let request = expect_request(harness.next_event().await);
    let body = request.body().expect("one stream").clone();

    harness.send(PayloadType::Stream, stream_id, b"part", false).await;
    harness.send(PayloadType::CancelStream, stream_id, b"", true).await;
    let err = timeout(WAIT, body.read_to_end())
        .await
        .expect("stream resolves")
        .expect_err("cancelled");
    assert_eq!(err, StreamAbort::Cancelled);
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn cancel_overtaking_request_still_reaches_consumer() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let stream_id = PayloadId::new();
    harness.send(PayloadType::Stream, stream_id, b"part", false).await;
    harness.send(PayloadType::CancelStream, stream_id, b"", true).await;
    harness.send(PayloadType::Stream, stream_id, b"late", false).await;
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, Some(8))])
        .await;

    let request = expect_request(harness.next_event().await);
    let err = timeout(WAIT, request.streams[0].read_to_end())
        .await
        .expect("stream resolves")
        .expect_err("cancelled");
    assert_eq!(err, StreamAbort::Cancelled);
    assert!(!harness.registry.contains(stream_id));
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn cancel_all_aborts_every_stream() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let ids = [PayloadId::new(), PayloadId::new()];
    harness
        .send_request(
            PayloadId::new(),
            ids.iter()
                .map(|id| StreamDescription::new(*id, None, None))
                .collect(),
        )
        .await;
    let request = expect_request(harness.next_event().await);
    harness.send(PayloadType::Stream, ids[0], b"a", false).await;
    harness.send(PayloadType::CancelAll, PayloadId::nil(), b"", true).await;

    for stream in &request.streams {
        let err = timeout(WAIT, stream.read_to_end())
            .await
            .expect("stream resolves")
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn clean_close_disconnects_incomplete_streams() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let stream_id = PayloadId::new();
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, None)])
        .await;
    let request = expect_request(harness.next_event().await);
    harness.send(PayloadType::Stream, stream_id, b"half", false).await;
    let shutdown = harness.shutdown.clone();

    harness.finish().await.expect("clean close between frames");
    let err = request.streams[0]
        .read_to_end()
        .await
        .expect_err("disconnected");
    assert!(matches!(err, StreamAbort::Disconnected { .. }));
    assert!(shutdown.is_cancelled());
}

#[rstest]
#[tokio::test]
async fn truncated_frame_reports_eof() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let header = FrameHeader::new(PayloadType::Stream, PayloadId::new(), 10, true);
    let io = harness.frames.get_mut();
    io.write_all(&header.to_bytes()).await.expect("write header");
    io.write_all(b"abc").await.expect("write partial body");

    let err = harness.finish().await.expect_err("mid-frame close");
    assert!(matches!(err, ReceiveError::Codec(CodecError::Eof(_))));
}

#[rstest]
#[tokio::test]
async fn unknown_type_tag_fails_loop() {
    let mut harness = Harness::spawn(SessionConfig::default());
    let stream_id = PayloadId::new();
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, None)])
        .await;
    let request = expect_request(harness.next_event().await);

    let mut raw = FrameHeader::new(PayloadType::Stream, stream_id, 0, true).to_bytes();
    raw[0] = b'Z';
    harness.frames.get_mut().write_all(&raw).await.expect("write");

    let err = timeout(WAIT, harness.task)
        .await
        .expect("receiver should stop")
        .expect("no panic")
        .expect_err("bad header");
    assert!(matches!(
        err,
        ReceiveError::Codec(CodecError::Framing(FramingError::InvalidHeader(
            HeaderError::UnknownType { tag: b'Z' }
        )))
    ));
    assert!(matches!(
        request.streams[0].stream().abort_reason(),
        Some(StreamAbort::Disconnected { .. })
    ));
}

#[rstest]
#[tokio::test]
#[traced_test]
async fn bad_metadata_is_skipped() {
    let mut harness = Harness::spawn(SessionConfig::default());
    harness
        .send(PayloadType::Request, PayloadId::new(), b"not json", true)
        .await;
    let id = PayloadId::new();
    harness.send_request(id, Vec::new()).await;

    let request = expect_request(harness.next_event().await);
    assert_eq!(request.id, id);
    assert!(logs_contain("failed to decode payload metadata"));
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn idle_stream_is_evicted() {
    let config = SessionConfig::default()
        .with_assembler_ttl(Some(Duration::from_millis(20)))
        .with_eviction_interval(Duration::from_millis(5));
    let mut harness = Harness::spawn(config);
    let stream_id = PayloadId::new();
    harness
        .send_request(PayloadId::new(), vec![StreamDescription::new(stream_id, None, None)])
        .await;
    let request = expect_request(harness.next_event().await);

    let err = timeout(WAIT, request.streams[0].read_to_end())
        .await
        .expect("eviction should fire")
        .expect_err("evicted");
    assert!(matches!(err, StreamAbort::Evicted { .. }));
    assert!(!harness.registry.contains(stream_id));
    harness.finish().await.expect("clean close");
}

#[rstest]
#[tokio::test]
async fn shutdown_stops_loop() {
    let harness = Harness::spawn(SessionConfig::default());
    harness.shutdown.cancel();
    let result = timeout(WAIT, harness.task)
        .await
        .expect("receiver should stop")
        .expect("no panic");
    assert!(result.is_ok());
}
