//! JSON wire format shared with the device agent.
//!
//! Orders and replies are single JSON objects. Over TCP every object is
//! terminated by `\n`; over UDP one datagram carries exactly one object.
//! serde_json never emits a raw newline, so the terminator is unambiguous.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::order::{CorrelationId, Order, OrderKind};
use crate::types::{DiskRecord, ProcessRecord};

pub const FRAME_DELIMITER: u8 = b'\n';

/// Order as transmitted to the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderMessage {
    pub id: CorrelationId,
    pub kind: OrderKind,
    pub deploy_path: String,
    /// Port of our listener for the transport the agent must answer on.
    pub reply_port: u16,
}

impl OrderMessage {
    pub fn from_order(order: &Order, reply_port: u16) -> Self {
        Self {
            id: order.id(),
            kind: order.kind(),
            deploy_path: order.deploy_path().to_string(),
            reply_port,
        }
    }

    pub fn encode(&self) -> ScanResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(ScanError::Encode)
    }

    /// Encoded form with the TCP frame terminator appended.
    pub fn encode_line(&self) -> ScanResult<Vec<u8>> {
        let mut buf = self.encode()?;
        buf.push(FRAME_DELIMITER);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> ScanResult<Self> {
        Ok(serde_json::from_slice(trim_frame(bytes))?)
    }
}

/// Decoded inbound reply: the echoed correlation id plus a result or error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub id: CorrelationId,
    pub body: ReplyBody,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyBody {
    Processes { records: Vec<ProcessRecord> },
    Disks { records: Vec<DiskRecord> },
    Error { message: String },
}

impl ReplyBody {
    /// Scan kind the body answers, `None` for device-reported errors.
    pub fn kind(&self) -> Option<OrderKind> {
        match self {
            ReplyBody::Processes { .. } => Some(OrderKind::ProcessScan),
            ReplyBody::Disks { .. } => Some(OrderKind::DiskScan),
            ReplyBody::Error { .. } => None,
        }
    }
}

impl ReplyEnvelope {
    pub fn new(id: CorrelationId, body: ReplyBody) -> Self {
        Self { id, body }
    }

    pub fn decode(bytes: &[u8]) -> ScanResult<Self> {
        Ok(serde_json::from_slice(trim_frame(bytes))?)
    }

    pub fn decode_str(s: &str) -> ScanResult<Self> {
        Self::decode(s.as_bytes())
    }

    pub fn encode(&self) -> ScanResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(ScanError::Encode)
    }

    pub fn encode_line(&self) -> ScanResult<Vec<u8>> {
        let mut buf = self.encode()?;
        buf.push(FRAME_DELIMITER);
        Ok(buf)
    }
}

// Agents commonly pad datagrams or leave a trailing CR/LF; neither is part of the JSON.
fn trim_frame(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| b.is_ascii_whitespace() || *b == 0;
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}
