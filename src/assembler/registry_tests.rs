//! Unit tests for [`AssemblerRegistry`].

use std::time::{Duration, Instant};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::*;

const TTL: Duration = Duration::from_secs(60);

#[fixture]
fn registry() -> AssemblerRegistry { AssemblerRegistry::new(Some(TTL)) }

fn header(payload_type: PayloadType, id: PayloadId, len: usize, end: bool) -> FrameHeader {
    FrameHeader::new(
        payload_type,
        id,
        u32::try_from(len).expect("test length fits"),
        end,
    )
}

fn feed(
    registry: &AssemblerRegistry,
    payload_type: PayloadType,
    id: PayloadId,
    body: &'static [u8],
    end: bool,
) -> Result<FrameOutcome, AssemblyError> {
    registry.on_frame(
        &header(payload_type, id, body.len(), end),
        Bytes::from_static(body),
        Instant::now(),
    )
}

#[rstest]
#[tokio::test]
async fn request_completes_and_leaves_registry(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    assert!(matches!(
        feed(&registry, PayloadType::Request, id, b"{\"verb\":", false),
        Ok(FrameOutcome::Buffered)
    ));
    assert_eq!(registry.active_len(), 1);
    let Ok(FrameOutcome::Completed(done)) =
        feed(&registry, PayloadType::Request, id, b"\"GET\"}", true)
    else {
        panic!("second frame should complete the request");
    };
    assert_eq!(done.id, id);
    assert_eq!(done.payload_type, PayloadType::Request);
    assert_eq!(
        done.stream.read_to_end().await.expect("complete"),
        Bytes::from_static(b"{\"verb\":\"GET\"}")
    );
    assert!(!registry.contains(id));
}

#[rstest]
#[tokio::test]
async fn claimed_stream_receives_later_frames(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    let stream = registry
        .claim_stream(id, Some(6), Instant::now())
        .expect("claim");
    feed(&registry, PayloadType::Stream, id, b"abc", false).expect("frame");
    feed(&registry, PayloadType::Stream, id, b"def", true).expect("frame");
    assert_eq!(
        stream.read_to_end().await.expect("complete"),
        Bytes::from_static(b"abcdef")
    );
    assert!(!registry.contains(id), "claimed stream leaves on completion");
}

#[rstest]
#[tokio::test]
async fn claim_joins_stream_in_progress(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"abc", false).expect("frame");
    let stream = registry.claim_stream(id, None, Instant::now()).expect("claim");
    feed(&registry, PayloadType::Stream, id, b"def", true).expect("frame");
    assert_eq!(
        stream.read_to_end().await.expect("complete"),
        Bytes::from_static(b"abcdef")
    );
    assert!(!registry.contains(id));
}

#[rstest]
#[tokio::test]
async fn unclaimed_stream_waits_for_claim(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"early", true).expect("frame");
    assert_eq!(registry.unclaimed_len(), 1);
    assert_eq!(registry.active_len(), 0);

    let stream = registry.claim_stream(id, None, Instant::now()).expect("claim");
    assert_eq!(
        stream.read_to_end().await.expect("complete"),
        Bytes::from_static(b"early")
    );
    assert!(!registry.contains(id));
}

#[rstest]
fn late_frame_after_unclaimed_completion_is_rejected(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"x", true).expect("frame");
    assert_eq!(
        feed(&registry, PayloadType::Stream, id, b"y", true).err(),
        Some(AssemblyError::AlreadyComplete { id })
    );
    assert!(registry.contains(id), "completed stream stays claimable");
}

#[rstest]
fn type_mismatch_aborts_payload(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Request, id, b"{", false).expect("frame");
    let err = feed(&registry, PayloadType::Stream, id, b"}", true).expect_err("mismatch");
    assert!(matches!(err, AssemblyError::TypeMismatch { .. }));
    assert!(!registry.contains(id));
}

#[rstest]
fn claim_rejects_request_ids(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Request, id, b"{", false).expect("frame");
    assert!(matches!(
        registry.claim_stream(id, None, Instant::now()),
        Err(AssemblyError::TypeMismatch { .. })
    ));
}

#[rstest]
fn declared_length_overrun_aborts_stream(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    let stream = registry
        .claim_stream(id, Some(2), Instant::now())
        .expect("claim");
    let err = feed(&registry, PayloadType::Stream, id, b"abc", false).expect_err("overrun");
    assert!(matches!(err, AssemblyError::ContentLengthExceeded { .. }));
    assert!(matches!(
        stream.abort_reason(),
        Some(StreamAbort::Malformed { .. })
    ));
    assert!(!registry.contains(id));
}

#[rstest]
fn cancel_aborts_in_flight_payload(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    let stream = registry.claim_stream(id, None, Instant::now()).expect("claim");
    feed(&registry, PayloadType::Stream, id, b"ab", false).expect("frame");
    assert!(registry.cancel(id));
    assert_eq!(stream.abort_reason(), Some(StreamAbort::Cancelled));
    assert!(!registry.contains(id));
}

#[rstest]
fn cancel_unknown_or_completed_is_noop(registry: AssemblerRegistry) {
    assert!(!registry.cancel(PayloadId::new()));
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"done", true).expect("frame");
    assert!(!registry.cancel(id));
    assert!(registry.contains(id));
}

#[rstest]
fn cancel_all_keeps_completed_streams(registry: AssemblerRegistry) {
    let done = PayloadId::new();
    feed(&registry, PayloadType::Stream, done, b"done", true).expect("frame");
    let streams: Vec<_> = (0..3)
        .map(|_| {
            let id = PayloadId::new();
            feed(&registry, PayloadType::Stream, id, b"part", false).expect("frame");
            registry.claim_stream(id, None, Instant::now()).expect("claim")
        })
        .collect();

    assert_eq!(registry.cancel_all(), 3);
    assert!(streams
        .iter()
        .all(|s| s.abort_reason() == Some(StreamAbort::Cancelled)));
    assert!(registry.contains(done));
    assert_eq!(registry.active_len(), 0);
}

#[rstest]
fn fail_all_releases_everything(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    let stream = registry.claim_stream(id, None, Instant::now()).expect("claim");
    feed(&registry, PayloadType::Stream, PayloadId::new(), b"orphan", true).expect("frame");

    assert_eq!(registry.fail_all(&StreamAbort::disconnected("reset")), 1);
    assert!(matches!(
        stream.abort_reason(),
        Some(StreamAbort::Disconnected { .. })
    ));
    assert_eq!(registry.unclaimed_len(), 0);
}

#[rstest]
fn purge_evicts_idle_entries(registry: AssemblerRegistry) {
    let start = Instant::now();
    let idle = PayloadId::new();
    let idle_stream = registry.claim_stream(idle, None, start).expect("claim");
    let orphan = PayloadId::new();
    registry
        .on_frame(
            &header(PayloadType::Stream, orphan, 1, true),
            Bytes::from_static(b"x"),
            start,
        )
        .expect("frame");
    let busy = PayloadId::new();
    registry
        .on_frame(
            &header(PayloadType::Stream, busy, 1, false),
            Bytes::from_static(b"y"),
            start + TTL,
        )
        .expect("frame");

    assert_eq!(registry.purge_expired_at(start + TTL - Duration::from_secs(1)), 0);
    assert_eq!(registry.purge_expired_at(start + TTL), 2);
    assert!(matches!(
        idle_stream.abort_reason(),
        Some(StreamAbort::Evicted { .. })
    ));
    assert!(!registry.contains(orphan));
    assert!(registry.contains(busy));
}

#[test]
fn purge_without_ttl_is_disabled() {
    let registry = AssemblerRegistry::new(None);
    let start = Instant::now();
    registry.claim_stream(PayloadId::new(), None, start).expect("claim");
    assert_eq!(registry.purge_expired_at(start + Duration::from_secs(86_400)), 0);
    assert_eq!(registry.active_len(), 1);
}

#[rstest]
#[tokio::test]
async fn claim_after_cancel_reads_cancelled(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"part", false).expect("frame");
    assert!(registry.cancel(id));
    assert_eq!(registry.active_len(), 0);

    let stream = registry.claim_stream(id, Some(8), Instant::now()).expect("claim");
    assert_eq!(stream.read_to_end().await, Err(StreamAbort::Cancelled));
    assert!(!registry.contains(id));
}

#[rstest]
fn frames_for_cancelled_payload_are_discarded(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Request, id, b"{", false).expect("frame");
    assert!(registry.cancel(id));
    assert!(matches!(
        feed(&registry, PayloadType::Request, id, b"}", true),
        Ok(FrameOutcome::Discarded)
    ));
    assert_eq!(registry.active_len(), 0);
    assert_eq!(registry.unclaimed_len(), 0);
}

#[rstest]
fn cancel_all_leaves_claimable_tombstones(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"part", false).expect("frame");
    assert_eq!(registry.cancel_all(), 1);
    let stream = registry.claim_stream(id, None, Instant::now()).expect("claim");
    assert_eq!(stream.abort_reason(), Some(StreamAbort::Cancelled));
}

#[rstest]
fn purge_drops_tombstones_without_counting_them(registry: AssemblerRegistry) {
    let id = PayloadId::new();
    feed(&registry, PayloadType::Stream, id, b"part", false).expect("frame");
    assert!(registry.cancel(id));
    assert!(registry.contains(id));
    assert_eq!(
        registry.purge_expired_at(Instant::now() + TTL + Duration::from_secs(1)),
        0
    );
    assert!(!registry.contains(id));
}
