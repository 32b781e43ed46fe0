//! Pending-wait table: correlation id -> single-assignment completion slot.
//!
//! Removing an entry from the map is the atomic claim on its slot. Whoever
//! removes it (the reply dispatcher fulfilling, or the waiter giving up) owns
//! the one-shot sender, so a slot is fulfilled at most once and a late reply
//! can never reach a wait that already timed out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{ScanError, ScanResult};
use crate::order::{CorrelationId, OrderKind};
use crate::wire::ReplyBody;

struct Slot {
    sender: oneshot::Sender<ReplyBody>,
    kind: OrderKind,
    registered_at: Instant,
}

/// Counters since the table was created.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub registered: AtomicU64,
    pub fulfilled: AtomicU64,
    pub expired: AtomicU64,
}

#[derive(Default)]
pub struct PendingWaits {
    slots: DashMap<CorrelationId, Slot>,
    stats: PendingStats,
}

impl PendingWaits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `id`. Fails if the id is already pending.
    pub fn register(self: &Arc<Self>, id: CorrelationId, kind: OrderKind) -> ScanResult<WaitHandle> {
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(id) {
            Entry::Occupied(_) => return Err(ScanError::DuplicateCorrelationId(id)),
            Entry::Vacant(v) => {
                v.insert(Slot {
                    sender: tx,
                    kind,
                    registered_at: Instant::now(),
                });
            }
        }
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %id, %kind, "registered pending wait");
        Ok(WaitHandle {
            id,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Fulfill the wait for `id`. Only the first call for a registered id has effect.
    pub fn fulfill(&self, id: CorrelationId, body: ReplyBody) -> bool {
        let Some((_, slot)) = self.slots.remove(&id) else {
            return false;
        };
        let waited = slot.registered_at.elapsed();
        match slot.sender.send(body) {
            Ok(()) => {
                self.stats.fulfilled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %id,
                    kind = %slot.kind,
                    waited_ms = waited.as_millis() as u64,
                    "fulfilled pending wait"
                );
                true
            }
            // Receiver dropped between our removal and the send; nobody is listening.
            Err(_) => false,
        }
    }

    /// Drop the wait for `id` if present. Safe to call any number of times.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every outstanding wait; their callers observe `WaitAbandoned`.
    pub fn drain(&self) -> usize {
        let n = self.slots.len();
        self.slots.clear();
        n
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Caller side of one pending wait. Dropping it removes the table entry.
pub struct WaitHandle {
    id: CorrelationId,
    rx: oneshot::Receiver<ReplyBody>,
    table: Arc<PendingWaits>,
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle").field("id", &self.id).finish()
    }
}

impl WaitHandle {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait up to `timeout` for the reply body.
    pub async fn wait(mut self, timeout: Duration) -> ScanResult<ReplyBody> {
        let id = self.id;
        let outcome = time::timeout(timeout, &mut self.rx).await;
        match outcome {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(ScanError::WaitAbandoned(id)),
            Err(_) => self.expire(timeout).await,
        }
    }

    /// Settle a wait whose timer fired. If the slot is already gone, whoever
    /// claimed it decides: a reply the dispatcher sent still wins, and a slot
    /// cleared by `drain` means the wait was abandoned.
    async fn expire(&mut self, timeout: Duration) -> ScanResult<ReplyBody> {
        let id = self.id;
        if self.table.remove(&id) {
            self.table.stats.expired.fetch_add(1, Ordering::Relaxed);
            return Err(ScanError::ScanTimeout { id, timeout });
        }
        // The claimer sends or drops the sender without yielding, so this
        // resolves immediately.
        match (&mut self.rx).await {
            Ok(body) => Ok(body),
            Err(_) => Err(ScanError::WaitAbandoned(id)),
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
