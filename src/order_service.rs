use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::device::Device;
use crate::error::{ScanError, ScanResult};
use crate::order::{CorrelationId, Order, OrderKind, TransportKind};
use crate::wire::OrderMessage;

/// Ports our reply listeners are bound to, echoed to agents inside each order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPorts {
    pub tcp: u16,
    pub udp: u16,
}

impl ReplyPorts {
    pub fn for_transport(&self, transport: TransportKind) -> u16 {
        match transport {
            TransportKind::Tcp => self.tcp,
            TransportKind::Udp => self.udp,
        }
    }
}

/// Builds orders for devices and puts them on the wire.
#[derive(Debug, Clone)]
pub struct OrderDispatchService {
    config: Arc<ScanConfig>,
    reply_ports: ReplyPorts,
}

impl OrderDispatchService {
    pub fn new(config: Arc<ScanConfig>, reply_ports: ReplyPorts) -> Self {
        Self {
            config,
            reply_ports,
        }
    }

    /// Create a pending order for `device` without sending it.
    ///
    /// The correlation id exists from here on, so a wait can be registered
    /// before any reply could possibly arrive.
    pub fn create_order(&self, device: &Device, kind: OrderKind) -> ScanResult<Order> {
        let ip = device.ipv4()?;
        let transport = self.config.transport_for(kind);
        let target = SocketAddr::new(IpAddr::V4(ip), self.config.agent_port(transport));
        Ok(Order::new(
            device.id.clone(),
            target,
            transport,
            kind,
            device.deploy_path.clone(),
        ))
    }

    /// Transmit an order once over its transport.
    pub async fn send(&self, order: &Order) -> ScanResult<()> {
        let transport = order.transport();
        let message = OrderMessage::from_order(order, self.reply_ports.for_transport(transport));
        let target = order.target();
        let sent = match transport {
            TransportKind::Tcp => {
                send_tcp(target, &message.encode_line()?, self.config.connect_timeout()).await
            }
            TransportKind::Udp => send_udp(target, &message.encode()?).await,
        };
        sent.map_err(|source| ScanError::TransportUnavailable {
            transport,
            target,
            source,
        })?;
        info!(
            correlation_id = %order.id(),
            kind = %order.kind(),
            %transport,
            %target,
            device_id = order.device_id(),
            "order dispatched"
        );
        Ok(())
    }

    /// Create and send an order, returning its correlation id.
    pub async fn dispatch(&self, device: &Device, kind: OrderKind) -> ScanResult<CorrelationId> {
        let order = self.create_order(device, kind)?;
        self.send(&order).await?;
        Ok(order.id())
    }

    pub fn reply_ports(&self) -> ReplyPorts {
        self.reply_ports
    }
}

async fn send_tcp(target: SocketAddr, frame: &[u8], timeout: Duration) -> io::Result<()> {
    let mut stream = time::timeout(timeout, TcpStream::connect(target))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    time::timeout(timeout, async {
        stream.write_all(frame).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;
    debug!(%target, bytes = frame.len(), "order written over tcp");
    Ok(())
}

async fn send_udp(target: SocketAddr, datagram: &[u8]) -> io::Result<()> {
    let local = match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(local).await?;
    let n = socket.send_to(datagram, target).await?;
    if n != datagram.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short datagram write: {n} of {} bytes", datagram.len()),
        ));
    }
    debug!(%target, bytes = n, "order sent over udp");
    Ok(())
}
