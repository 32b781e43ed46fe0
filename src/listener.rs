//! Inbound reply listeners, one per transport.
//!
//! Both loops are owned by a [`Listeners`] value: `start` binds the sockets and
//! spawns the loops, `shutdown` cancels and joins them. Dropping the value
//! aborts the tasks.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::dispatcher::ReplyDispatcher;
use crate::error::{ScanError, ScanResult};
use crate::order::TransportKind;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listeners {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Listeners {
    /// Bind both sockets and start their receive loops.
    pub async fn start(config: &ScanConfig, dispatcher: ReplyDispatcher) -> ScanResult<Self> {
        let tcp_bind = config.tcp_listen_addr();
        let tcp = TcpListener::bind(tcp_bind)
            .await
            .map_err(|source| ScanError::ListenerBind {
                transport: TransportKind::Tcp,
                addr: tcp_bind,
                source,
            })?;
        let udp_bind = config.udp_listen_addr();
        let udp = UdpSocket::bind(udp_bind)
            .await
            .map_err(|source| ScanError::ListenerBind {
                transport: TransportKind::Udp,
                addr: udp_bind,
                source,
            })?;
        let tcp_addr = tcp.local_addr().map_err(|source| ScanError::ListenerBind {
            transport: TransportKind::Tcp,
            addr: tcp_bind,
            source,
        })?;
        let udp_addr = udp.local_addr().map_err(|source| ScanError::ListenerBind {
            transport: TransportKind::Udp,
            addr: udp_bind,
            source,
        })?;

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(run_tcp(
            tcp,
            dispatcher.clone(),
            config.scan.max_frame_len,
            cancel.clone(),
        ));
        tasks.spawn(run_udp(
            udp,
            dispatcher,
            config.scan.max_datagram_len,
            cancel.clone(),
        ));

        info!(%tcp_addr, %udp_addr, "reply listeners started");
        Ok(Self {
            tcp_addr,
            udp_addr,
            cancel,
            tasks,
        })
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Bound address of the listener for `transport`.
    pub fn addr(&self, transport: TransportKind) -> SocketAddr {
        match transport {
            TransportKind::Tcp => self.tcp_addr,
            TransportKind::Udp => self.udp_addr,
        }
    }

    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "listener task ended abnormally");
            }
        }
        info!("reply listeners stopped");
    }
}

async fn run_tcp(
    listener: TcpListener,
    dispatcher: ReplyDispatcher,
    max_frame_len: usize,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "reply connection accepted");
                    connections.spawn(read_frames(
                        stream,
                        peer,
                        dispatcher.clone(),
                        max_frame_len,
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    // Typically fd exhaustion; back off instead of spinning.
                    warn!(error = %e, "accept failed");
                    time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
}

/// Read newline-delimited envelopes from one device connection until EOF.
///
/// An oversized or non-UTF-8 frame loses framing for the rest of the stream,
/// so it is counted as a decode failure and the connection is closed.
async fn read_frames(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: ReplyDispatcher,
    max_frame_len: usize,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(stream, LinesCodec::new_with_max_length(max_frame_len));
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatcher.on_frame(TransportKind::Tcp, peer, line.as_bytes());
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                dispatcher.record_decode_failure(
                    TransportKind::Tcp,
                    peer,
                    &format!("frame longer than {max_frame_len} bytes"),
                );
                break;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    dispatcher.record_decode_failure(TransportKind::Tcp, peer, &e);
                } else {
                    debug!(%peer, error = %e, "reply connection read failed");
                }
                break;
            }
            None => break,
        }
    }
    debug!(%peer, "reply connection closed");
}

async fn run_udp(
    socket: UdpSocket,
    dispatcher: ReplyDispatcher,
    max_datagram_len: usize,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; max_datagram_len];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };
        match received {
            Ok((n, peer)) => dispatcher.on_frame(TransportKind::Udp, peer, &buf[..n]),
            // ICMP errors from earlier sends surface here on some platforms.
            Err(e) => debug!(error = %e, "udp receive failed"),
        }
    }
}
