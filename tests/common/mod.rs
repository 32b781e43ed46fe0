//! A stand-in device agent speaking the order/reply wire format on loopback.
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use fleet_scan_rs::config::ScanConfig;
use fleet_scan_rs::order::OrderKind;
use fleet_scan_rs::types::{DiskRecord, ProcessRecord};
use fleet_scan_rs::wire::{OrderMessage, ReplyBody, ReplyEnvelope};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// How the agent answers each order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// One reply carrying records derived from the order.
    Answer,
    /// Two replies back-to-back; the second carries different records.
    AnswerTwice,
    /// Read the order and never answer.
    Silent,
    /// Answer with a device-side error.
    Fail,
}

pub struct FakeAgent {
    pub tcp_port: u16,
    pub udp_port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

impl FakeAgent {
    pub async fn start(behavior: Behavior) -> Self {
        let tcp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let udp = Arc::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap());
        let tcp_port = tcp.local_addr().unwrap().port();
        let udp_port = udp.local_addr().unwrap().port();

        let tcp_task = tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = tcp.accept().await else { return };
                tokio::spawn(async move {
                    let mut line = String::new();
                    let mut reader = BufReader::new(stream);
                    if reader.read_line(&mut line).await.is_err() {
                        return;
                    }
                    let order = OrderMessage::decode(line.as_bytes()).unwrap();
                    let target = SocketAddr::new(peer.ip(), order.reply_port);
                    for body in replies(behavior, &order) {
                        delay_for(&order).await;
                        let mut out = TcpStream::connect(target).await.unwrap();
                        let frame = ReplyEnvelope::new(order.id, body).encode_line().unwrap();
                        out.write_all(&frame).await.unwrap();
                        out.shutdown().await.ok();
                    }
                    // keep the order connection open like a slow agent would
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        let udp_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65_535];
            loop {
                let Ok((n, peer)) = udp.recv_from(&mut buf).await else { return };
                let order = OrderMessage::decode(&buf[..n]).unwrap();
                let udp = Arc::clone(&udp);
                tokio::spawn(async move {
                    let target = SocketAddr::new(peer.ip(), order.reply_port);
                    for body in replies(behavior, &order) {
                        delay_for(&order).await;
                        let datagram = ReplyEnvelope::new(order.id, body).encode().unwrap();
                        udp.send_to(&datagram, target).await.unwrap();
                    }
                });
            }
        });

        Self {
            tcp_port,
            udp_port,
            tasks: vec![tcp_task, udp_task],
        }
    }

    /// Server config pointing at this agent, listeners on ephemeral loopback ports.
    pub fn config(&self, reply_timeout: Duration) -> ScanConfig {
        let mut cfg = ScanConfig::default();
        cfg.listen.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        cfg.listen.tcp_port = 0;
        cfg.listen.udp_port = 0;
        cfg.agent.tcp_port = self.tcp_port;
        cfg.agent.udp_port = self.udp_port;
        cfg.scan.reply_timeout_ms = reply_timeout.as_millis() as u64;
        cfg
    }
}

/// Records the agent reports: tagged with the order id so callers can detect cross-wiring.
pub fn records_for(order: &OrderMessage, generation: u32) -> ReplyBody {
    let tag = order.id.to_string();
    match order.kind {
        OrderKind::ProcessScan => ReplyBody::Processes {
            records: vec![ProcessRecord {
                pid: 100 + generation,
                name: tag,
                priority: Some(20),
                ram_used: 4096,
            }],
        },
        OrderKind::DiskScan => ReplyBody::Disks {
            records: (0..3)
                .map(|i| DiskRecord {
                    name: format!("{tag}/{generation}/{i}"),
                    size: 1_000,
                    used_size: 250 * i,
                })
                .collect(),
        },
    }
}

fn replies(behavior: Behavior, order: &OrderMessage) -> Vec<ReplyBody> {
    match behavior {
        Behavior::Answer => vec![records_for(order, 0)],
        Behavior::AnswerTwice => vec![records_for(order, 0), records_for(order, 1)],
        Behavior::Silent => Vec::new(),
        Behavior::Fail => vec![ReplyBody::Error {
            message: format!("{} scan unsupported", order.kind),
        }],
    }
}

// Spread replies over 0..40ms so they come back out of dispatch order.
async fn delay_for(order: &OrderMessage) {
    let b = order.id.as_uuid().as_bytes()[15] as u64;
    tokio::time::sleep(Duration::from_millis(b % 40)).await;
}
