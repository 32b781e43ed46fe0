//! Routes inbound reply envelopes to the wait registered for their correlation id.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{ScanError, ScanResult};
use crate::order::{CorrelationId, TransportKind};
use crate::pending::PendingWaits;
use crate::wire::ReplyEnvelope;

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    unknown: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time view of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub unknown: u64,
    pub decode_failures: u64,
    pub pending: u64,
}

#[derive(Clone)]
pub struct ReplyDispatcher {
    waits: Arc<PendingWaits>,
    counters: Arc<Counters>,
}

impl ReplyDispatcher {
    pub fn new(waits: Arc<PendingWaits>) -> Self {
        Self {
            waits,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Hand an envelope to its pending wait.
    ///
    /// Duplicates, replies for timed-out orders and unknown ids all come back as
    /// `UnknownCorrelationId` and leave every other wait untouched.
    pub fn on_reply(&self, envelope: ReplyEnvelope) -> ScanResult<CorrelationId> {
        let id = envelope.id;
        if self.waits.fulfill(id, envelope.body) {
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            trace!(correlation_id = %id, "reply delivered");
            Ok(id)
        } else {
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            Err(ScanError::UnknownCorrelationId(id))
        }
    }

    /// Decode raw bytes from `transport` and dispatch them.
    ///
    /// Used by the listeners; never fails, only logs and counts.
    pub fn on_frame(&self, transport: TransportKind, peer: SocketAddr, frame: &[u8]) {
        let envelope = match ReplyEnvelope::decode(frame) {
            Ok(env) => env,
            Err(e) => {
                self.record_decode_failure(transport, peer, &e);
                return;
            }
        };
        if let Err(e) = self.on_reply(envelope) {
            debug!(%transport, %peer, error = %e, "dropping reply");
        }
    }

    pub fn record_decode_failure(
        &self,
        transport: TransportKind,
        peer: SocketAddr,
        error: &dyn std::fmt::Display,
    ) {
        self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
        warn!(%transport, %peer, error = %error, "discarding malformed reply");
    }

    pub fn waits(&self) -> &Arc<PendingWaits> {
        &self.waits
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            pending: self.waits.len() as u64,
        }
    }
}
