//! Orders: the outstanding requests sent to devices and their lifecycle.

use std::fmt;
use std::net::SocketAddr;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier embedded in an order and echoed verbatim in its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// What the device is asked to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    ProcessScan,
    DiskScan,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::ProcessScan => f.write_str("process"),
            OrderKind::DiskScan => f.write_str("disk"),
        }
    }
}

/// Network transport an order travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("TCP"),
            TransportKind::Udp => f.write_str("UDP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    TimedOut,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// A request to one device, from creation until it reaches a terminal status.
#[derive(Debug, Clone)]
pub struct Order {
    id: CorrelationId,
    device_id: String,
    target: SocketAddr,
    transport: TransportKind,
    kind: OrderKind,
    deploy_path: String,
    created_at: OffsetDateTime,
    status: OrderStatus,
}

impl Order {
    pub fn new(
        device_id: impl Into<String>,
        target: SocketAddr,
        transport: TransportKind,
        kind: OrderKind,
        deploy_path: impl Into<String>,
    ) -> Self {
        Self {
            id: CorrelationId::new(),
            device_id: device_id.into(),
            target,
            transport,
            kind,
            deploy_path: deploy_path.into(),
            created_at: OffsetDateTime::now_utc(),
            status: OrderStatus::Pending,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn deploy_path(&self) -> &str {
        &self.deploy_path
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// RFC3339 creation time, for logs and reports.
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at
            .format(&well_known::Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Move a pending order to a terminal status.
    ///
    /// Returns false and leaves the order untouched if it already settled.
    pub fn settle(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}
