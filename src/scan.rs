//! Caller-facing side of a scan: register a wait for an order, then await it.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::order::{CorrelationId, Order, OrderKind};
use crate::pending::{PendingWaits, WaitHandle};
use crate::types::{DiskRecord, ProcessRecord};
use crate::wire::ReplyBody;

/// Result type of one scan kind, extracted from a reply body.
pub trait ScanPayload: Sized + Send + 'static {
    const KIND: OrderKind;

    fn from_body(id: CorrelationId, body: ReplyBody) -> ScanResult<Self>;
}

impl ScanPayload for Vec<ProcessRecord> {
    const KIND: OrderKind = OrderKind::ProcessScan;

    fn from_body(id: CorrelationId, body: ReplyBody) -> ScanResult<Self> {
        match body {
            ReplyBody::Processes { records } => Ok(records),
            other => Err(unexpected(id, Self::KIND, other)),
        }
    }
}

impl ScanPayload for Vec<DiskRecord> {
    const KIND: OrderKind = OrderKind::DiskScan;

    fn from_body(id: CorrelationId, body: ReplyBody) -> ScanResult<Self> {
        match body {
            ReplyBody::Disks { records } => Ok(records),
            other => Err(unexpected(id, Self::KIND, other)),
        }
    }
}

fn unexpected(id: CorrelationId, expected: OrderKind, body: ReplyBody) -> ScanError {
    match body {
        ReplyBody::Error { message } => ScanError::DeviceReported { id, message },
        _ => ScanError::UnexpectedReply { id, expected },
    }
}

/// Awaitable result of one order.
pub struct ScanHandle<T> {
    wait: WaitHandle,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for ScanHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle").field("id", &self.wait.id()).finish()
    }
}

impl<T: ScanPayload> ScanHandle<T> {
    pub fn id(&self) -> CorrelationId {
        self.wait.id()
    }

    /// Wait at most `timeout` for the device's reply.
    ///
    /// Fails with `ScanTimeout` when nothing arrived in time; the wait is
    /// removed from the table either way.
    pub async fn wait(self, timeout: Duration) -> ScanResult<T> {
        let id = self.wait.id();
        let body = self.wait.wait(timeout).await?;
        T::from_body(id, body)
    }
}

#[derive(Clone)]
pub struct ScanHandlerService {
    waits: Arc<PendingWaits>,
}

impl ScanHandlerService {
    pub fn new(waits: Arc<PendingWaits>) -> Self {
        Self { waits }
    }

    pub fn process_scan_handler(&self, order: &Order) -> ScanResult<ScanHandle<Vec<ProcessRecord>>> {
        self.handler(order)
    }

    pub fn disk_scan_handler(&self, order: &Order) -> ScanResult<ScanHandle<Vec<DiskRecord>>> {
        self.handler(order)
    }

    /// Register the wait for `order`. Must happen before the order is sent.
    pub fn handler<T: ScanPayload>(&self, order: &Order) -> ScanResult<ScanHandle<T>> {
        if order.kind() != T::KIND {
            return Err(ScanError::KindMismatch {
                id: order.id(),
                order: order.kind(),
                handler: T::KIND,
            });
        }
        let wait = self.waits.register(order.id(), order.kind())?;
        Ok(ScanHandle {
            wait,
            _payload: PhantomData,
        })
    }

    pub fn pending(&self) -> usize {
        self.waits.len()
    }
}
