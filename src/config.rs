use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::order::{OrderKind, TransportKind};

/// Runtime configuration. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub listen: ListenConfig,
    pub agent: AgentConfig,
    pub transports: TransportConfig,
    pub scan: ScanLimits,
}

/// Where our reply listeners bind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    pub host: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 6005,
            udp_port: 6004,
        }
    }
}

/// How device agents are reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub tcp_port: u16,
    pub udp_port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tcp_port: 5889,
            udp_port: 5888,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Transport used for each scan kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub process_scan: TransportKind,
    pub disk_scan: TransportKind,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            process_scan: TransportKind::Tcp,
            disk_scan: TransportKind::Udp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanLimits {
    pub reply_timeout_ms: u64,
    pub max_frame_len: usize,
    pub max_datagram_len: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 30_000,
            max_frame_len: 1024 * 1024,
            max_datagram_len: 65_507,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scan.reply_timeout_ms == 0 {
            bail!("scan.reply_timeout_ms cannot be 0");
        }
        if self.agent.connect_timeout_ms == 0 {
            bail!("agent.connect_timeout_ms cannot be 0");
        }
        if self.scan.max_frame_len == 0 {
            bail!("scan.max_frame_len cannot be 0");
        }
        if self.scan.max_datagram_len == 0 || self.scan.max_datagram_len > 65_507 {
            bail!(
                "scan.max_datagram_len must be in 1..=65507, got {}",
                self.scan.max_datagram_len
            );
        }
        for (name, port) in [
            ("agent.tcp_port", self.agent.tcp_port),
            ("agent.udp_port", self.agent.udp_port),
        ] {
            if port == 0 {
                bail!("{name} cannot be 0");
            }
        }
        Ok(())
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.scan.reply_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.agent.connect_timeout_ms)
    }

    pub fn tcp_listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen.host, self.listen.tcp_port)
    }

    pub fn udp_listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen.host, self.listen.udp_port)
    }

    pub fn transport_for(&self, kind: OrderKind) -> TransportKind {
        match kind {
            OrderKind::ProcessScan => self.transports.process_scan,
            OrderKind::DiskScan => self.transports.disk_scan,
        }
    }

    /// Agent port that accepts orders over `transport`.
    pub fn agent_port(&self, transport: TransportKind) -> u16 {
        match transport {
            TransportKind::Tcp => self.agent.tcp_port,
            TransportKind::Udp => self.agent.udp_port,
        }
    }
}

/// Parse and validate a JSON configuration document.
pub fn parse_config_str(s: &str) -> Result<ScanConfig> {
    let cfg: ScanConfig = serde_json::from_str(s).context("invalid configuration JSON")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ScanConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
    parse_config_str(&content)
        .with_context(|| format!("in config file: {}", path.as_ref().display()))
}
