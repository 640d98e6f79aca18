//! Requests awaiting their response.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::{header::PayloadId, message::ReceivedResponse};

/// Table of outstanding requests keyed by request id.
#[derive(Debug, Default)]
pub(super) struct PendingResponses {
    slots: DashMap<PayloadId, oneshot::Sender<ReceivedResponse>>,
    closed: AtomicBool,
}

impl PendingResponses {
    /// Register `id`, returning `None` once the connection is gone.
    pub(super) fn register(&self, id: PayloadId) -> Option<oneshot::Receiver<ReceivedResponse>> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, tx);
        if self.closed.load(Ordering::Acquire) {
            self.slots.remove(&id);
            return None;
        }
        Some(rx)
    }

    /// Hand `response` to the request waiting for it.
    ///
    /// Returns `false` if no request with that id is waiting.
    pub(super) fn resolve(&self, response: ReceivedResponse) -> bool {
        match self.slots.remove(&response.id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub(super) fn remove(&self, id: PayloadId) { self.slots.remove(&id); }

    /// Drop every waiter so each resolves as disconnected, and refuse new
    /// registrations.
    pub(super) fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.clear();
    }

    pub(super) fn len(&self) -> usize { self.slots.len() }
}

/// Removes a request's entry if its caller stops waiting.
pub(super) struct PendingGuard {
    pub(super) pending: Arc<PendingResponses>,
    pub(super) id: PayloadId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) { self.pending.remove(self.id); }
}
