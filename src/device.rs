//! Device identity as consumed from the persistence layer.

use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// The parts of a managed device the scan core needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub host_address: String,
    pub deploy_path: String,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host_address: impl Into<String>,
        deploy_path: &str,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host_address: host_address.into(),
            deploy_path: format_path(deploy_path),
        }
    }

    /// Parse the host address. Devices are addressed by IPv4 only.
    pub fn ipv4(&self) -> ScanResult<Ipv4Addr> {
        self.host_address
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| ScanError::InvalidAddress {
                address: self.host_address.clone(),
            })
    }
}

/// Normalize a deploy path: forward slashes only, exactly one trailing `/`.
pub fn format_path(path: &str) -> String {
    let mut out = path.trim().replace('\\', "/");
    while out.contains("//") {
        out = out.replace("//", "/");
    }
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Lookup of devices by id.
pub trait DeviceRepository: Send + Sync {
    fn get_device_by_id(&self, id: &str) -> ScanResult<Device>;
}

/// Repository backed by an in-process map, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRepository {
    devices: DashMap<String, Device>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device: Device) -> Option<Device> {
        self.devices.insert(device.id.clone(), device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Build from a JSON array of devices. Deploy paths are normalized on load.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let list: Vec<Device> = serde_json::from_str(s).context("invalid device list JSON")?;
        let repo = Self::new();
        for d in list {
            repo.insert(Device::new(d.id, d.name, d.host_address, &d.deploy_path));
        }
        Ok(repo)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read device list: {}", path.as_ref().display()))?;
        Self::from_json_str(&content)
    }
}

impl DeviceRepository for InMemoryDeviceRepository {
    fn get_device_by_id(&self, id: &str) -> ScanResult<Device> {
        if id.is_empty() {
            return Err(ScanError::DeviceNotFound { id: id.to_string() });
        }
        self.devices
            .get(id)
            .map(|d| d.value().clone())
            .ok_or_else(|| ScanError::DeviceNotFound { id: id.to_string() })
    }
}
