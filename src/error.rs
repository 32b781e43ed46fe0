use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::order::{CorrelationId, OrderKind, TransportKind};

/// Failures of the order/reply protocol.
///
/// Timeouts, device-reported errors and missing devices are separate variants so
/// callers can tell "device unreachable" from "device said no" from "device unknown".
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid device address: {address}")]
    InvalidAddress { address: String },

    #[error("{transport} transport unavailable for {target}: {source}")]
    TransportUnavailable {
        transport: TransportKind,
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("no pending wait for correlation id {0}")]
    UnknownCorrelationId(CorrelationId),

    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(CorrelationId),

    #[error("scan {id} timed out after {}s", .timeout.as_secs_f64())]
    ScanTimeout { id: CorrelationId, timeout: Duration },

    #[error("device reported an error for scan {id}: {message}")]
    DeviceReported { id: CorrelationId, message: String },

    #[error("reply for scan {id} does not carry {expected} records")]
    UnexpectedReply { id: CorrelationId, expected: OrderKind },

    #[error("order {id} is a {order} scan, handler expects {handler}")]
    KindMismatch {
        id: CorrelationId,
        order: OrderKind,
        handler: OrderKind,
    },

    #[error("device not found: {id}")]
    DeviceNotFound { id: String },

    #[error("wait for scan {0} abandoned before a reply arrived")]
    WaitAbandoned(CorrelationId),

    #[error("failed to bind {transport} listener on {addr}: {source}")]
    ListenerBind {
        transport: TransportKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    /// True when the device never answered within the bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScanError::ScanTimeout { .. })
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
