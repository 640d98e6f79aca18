//! Registry of in-flight assemblers for one connection.
//!
//! `AssemblerRegistry` maps payload ids to their assembly state. Entries are
//! inserted on the first frame (or first claim) for an id and removed on
//! completion, cancellation, connection failure, or eviction. Each id has a
//! single slot guarded by `DashMap`'s per-shard locks, so a stream that
//! completes while a consumer is claiming it cannot be lost.
//!
//! A `Stream` payload that completes before anyone claims it is parked as
//! unclaimed until a request or response description claims it, or until
//! the eviction sweep drops it.
//!
//! A cancelled payload that nobody has claimed leaves a tombstone behind.
//! Its late frames are dropped, and a later claim receives a stream that is
//! already cancelled. Tombstones go away on claim, on eviction, or when the
//! connection fails.

use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use super::{AssemblerStatus, AssemblyError, PayloadAssembler};
use crate::{
    header::{FrameHeader, PayloadId, PayloadType},
    metrics,
    stream::{PayloadStream, StreamAbort},
};

#[derive(Debug)]
enum Slot {
    Assembling(PayloadAssembler),
    Unclaimed {
        stream: PayloadStream,
        completed_at: Instant,
    },
    Cancelled {
        at: Instant,
    },
}

/// A payload whose final frame has arrived.
#[derive(Clone, Debug)]
pub struct CompletedPayload {
    /// Payload id.
    pub id: PayloadId,
    /// Payload type.
    pub payload_type: PayloadType,
    /// Completed stream holding the payload body.
    pub stream: PayloadStream,
}

/// Result of routing one frame through the registry.
#[derive(Clone, Debug)]
pub enum FrameOutcome {
    /// The frame was appended; more are expected.
    Buffered,
    /// The frame completed its payload.
    Completed(CompletedPayload),
    /// The payload was cancelled earlier; the frame was dropped.
    Discarded,
}

/// Concurrent map from payload id to assembly state.
#[derive(Debug, Default)]
pub struct AssemblerRegistry {
    slots: DashMap<PayloadId, Slot>,
    ttl: Option<Duration>,
}

impl AssemblerRegistry {
    /// Create a registry evicting idle entries after `ttl`, if set.
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }

    /// Route a data frame to its assembler, creating one on first sight.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] if the frame conflicts with the payload's
    /// state. The offending entry is removed and its stream aborted, except
    /// for late frames on a completed payload, which leave it untouched.
    pub fn on_frame(
        &self,
        header: &FrameHeader,
        body: Bytes,
        now: Instant,
    ) -> Result<FrameOutcome, AssemblyError> {
        let (outcome, changed) = self.route_frame(header, body, now);
        if changed {
            self.refresh_gauge();
        }
        outcome
    }

    /// Apply one frame; the flag reports whether the set of in-flight
    /// payloads changed.
    fn route_frame(
        &self,
        header: &FrameHeader,
        body: Bytes,
        now: Instant,
    ) -> (Result<FrameOutcome, AssemblyError>, bool) {
        let id = header.id;
        match self.slots.entry(id) {
            Entry::Vacant(vacant) => {
                let mut assembler = PayloadAssembler::new(id, header.payload_type, None, now);
                match assembler.on_receive(body, header.end, now) {
                    Err(err) => (Err(err), false),
                    Ok(AssemblerStatus::Incomplete) => {
                        vacant.insert(Slot::Assembling(assembler));
                        (Ok(FrameOutcome::Buffered), true)
                    }
                    Ok(AssemblerStatus::Complete) => {
                        let completed = completed(&assembler);
                        if header.payload_type == PayloadType::Stream {
                            debug!(%id, "stream completed before being claimed");
                            vacant.insert(Slot::Unclaimed {
                                stream: completed.stream.clone(),
                                completed_at: now,
                            });
                        }
                        (Ok(FrameOutcome::Completed(completed)), false)
                    }
                }
            }
            Entry::Occupied(mut occupied) => {
                let assembler = match occupied.get_mut() {
                    Slot::Assembling(assembler) => assembler,
                    Slot::Unclaimed { .. } => {
                        return (Err(AssemblyError::AlreadyComplete { id }), false);
                    }
                    Slot::Cancelled { .. } => return (Ok(FrameOutcome::Discarded), false),
                };
                if assembler.payload_type() != header.payload_type {
                    let err = AssemblyError::TypeMismatch {
                        id,
                        expected: assembler.payload_type(),
                        found: header.payload_type,
                    };
                    assembler.close(StreamAbort::Malformed {
                        reason: err.to_string(),
                    });
                    occupied.remove();
                    return (Err(err), true);
                }
                match assembler.on_receive(body, header.end, now) {
                    Ok(AssemblerStatus::Incomplete) => (Ok(FrameOutcome::Buffered), false),
                    Ok(AssemblerStatus::Complete) => {
                        let completed = completed(assembler);
                        if header.payload_type == PayloadType::Stream && !assembler.is_claimed() {
                            debug!(%id, "stream completed before being claimed");
                            *occupied.get_mut() = Slot::Unclaimed {
                                stream: completed.stream.clone(),
                                completed_at: now,
                            };
                        } else {
                            occupied.remove();
                        }
                        (Ok(FrameOutcome::Completed(completed)), true)
                    }
                    Err(err) => {
                        occupied.remove();
                        (Err(err), true)
                    }
                }
            }
        }
    }

    /// Obtain the stream for a content stream described by a request or
    /// response.
    ///
    /// The stream may already be complete, still assembling, or not yet
    /// started; in the last case an assembler is created so later frames
    /// land in the returned stream.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::TypeMismatch`] if `id` belongs to a request or
    /// response payload.
    pub fn claim_stream(
        &self,
        id: PayloadId,
        content_length: Option<u64>,
        now: Instant,
    ) -> Result<PayloadStream, AssemblyError> {
        let claimed = match self.slots.entry(id) {
            Entry::Vacant(vacant) => {
                let mut assembler =
                    PayloadAssembler::new(id, PayloadType::Stream, content_length, now);
                assembler.claim(content_length);
                let stream = assembler.get_payload_stream();
                vacant.insert(Slot::Assembling(assembler));
                Ok(stream)
            }
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Slot::Assembling(assembler) if assembler.payload_type() == PayloadType::Stream => {
                    assembler.claim(content_length);
                    Ok(assembler.get_payload_stream())
                }
                Slot::Assembling(assembler) => Err(AssemblyError::TypeMismatch {
                    id,
                    expected: PayloadType::Stream,
                    found: assembler.payload_type(),
                }),
                Slot::Unclaimed { stream, .. } => {
                    let stream = stream.clone();
                    occupied.remove();
                    Ok(stream)
                }
                Slot::Cancelled { .. } => {
                    debug!(%id, "claimed stream was already cancelled");
                    occupied.remove();
                    let stream = PayloadStream::new(id);
                    stream.abort(StreamAbort::Cancelled);
                    Ok(stream)
                }
            },
        };
        self.refresh_gauge();
        claimed
    }

    /// Abort the in-flight payload `id` with [`StreamAbort::Cancelled`].
    ///
    /// Returns `false` when `id` is unknown or already complete.
    pub fn cancel(&self, id: PayloadId) -> bool {
        let cancelled = match self.slots.get_mut(&id) {
            Some(mut slot) => cancel_slot(slot.value_mut(), Instant::now()),
            None => false,
        };
        if cancelled {
            self.slots.remove_if(&id, |_, slot| matches!(slot, Slot::Assembling(_)));
            self.refresh_gauge();
        }
        cancelled
    }

    /// Abort every in-flight payload with [`StreamAbort::Cancelled`].
    ///
    /// Completed but unclaimed streams are kept. Returns the number of
    /// payloads aborted.
    pub fn cancel_all(&self) -> usize {
        let now = Instant::now();
        let mut cancelled = 0;
        self.slots.retain(|_, slot| {
            if cancel_slot(slot, now) {
                cancelled += 1;
            }
            !matches!(slot, Slot::Assembling(_))
        });
        self.refresh_gauge();
        cancelled
    }

    /// Abort every in-flight payload with `reason` and drop unclaimed
    /// streams. Used when the connection fails.
    ///
    /// Returns the number of payloads aborted.
    pub fn fail_all(&self, reason: &StreamAbort) -> usize {
        let aborted = self.abort_assembling(reason);
        let orphaned = self.unclaimed_len();
        if orphaned > 0 {
            warn!(count = orphaned, "dropping unclaimed streams on disconnect");
        }
        self.slots.clear();
        metrics::set_active_assemblers(0);
        aborted
    }

    fn abort_assembling(&self, reason: &StreamAbort) -> usize {
        let mut aborted = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Assembling(assembler) => {
                if assembler.close(reason.clone()) {
                    aborted += 1;
                }
                false
            }
            Slot::Unclaimed { .. } | Slot::Cancelled { .. } => true,
        });
        aborted
    }

    /// Evict entries idle for at least the configured TTL as of `now`.
    ///
    /// In-flight payloads are aborted with [`StreamAbort::Evicted`];
    /// unclaimed streams are dropped. Returns the number of entries removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut evicted = 0;
        self.slots.retain(|id, slot| {
            let idle = match slot {
                Slot::Assembling(assembler) => now.saturating_duration_since(assembler.last_activity()),
                Slot::Unclaimed { completed_at, .. } => now.saturating_duration_since(*completed_at),
                Slot::Cancelled { at } => now.saturating_duration_since(*at),
            };
            if idle < ttl {
                return true;
            }
            match slot {
                Slot::Assembling(assembler) => {
                    debug!(%id, ?idle, "evicting idle assembler");
                    assembler.close(StreamAbort::Evicted { idle });
                }
                Slot::Unclaimed { .. } => warn!(%id, ?idle, "evicting orphaned stream"),
                Slot::Cancelled { .. } => return false,
            }
            evicted += 1;
            false
        });
        if evicted > 0 {
            metrics::inc_evicted(evicted);
        }
        self.refresh_gauge();
        evicted
    }

    /// Evict idle entries as of the current instant.
    pub fn purge_expired(&self) -> usize { self.purge_expired_at(Instant::now()) }

    /// Number of payloads still awaiting their final frame.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Assembling(_)))
            .count()
    }

    /// Number of completed streams nobody has claimed yet.
    #[must_use]
    pub fn unclaimed_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Unclaimed { .. }))
            .count()
    }

    /// Whether the registry tracks `id`.
    #[must_use]
    pub fn contains(&self, id: PayloadId) -> bool { self.slots.contains_key(&id) }

    fn refresh_gauge(&self) { metrics::set_active_assemblers(self.active_len()); }
}

/// Cancel an in-flight slot, leaving a tombstone unless a consumer already
/// holds its stream. Returns `false` for slots that are not in flight.
fn cancel_slot(slot: &mut Slot, now: Instant) -> bool {
    let Slot::Assembling(assembler) = slot else {
        return false;
    };
    let cancelled = assembler.cancel();
    if !assembler.is_claimed() {
        *slot = Slot::Cancelled { at: now };
    }
    cancelled
}

fn completed(assembler: &PayloadAssembler) -> CompletedPayload {
    CompletedPayload {
        id: assembler.id(),
        payload_type: assembler.payload_type(),
        stream: assembler.get_payload_stream(),
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
