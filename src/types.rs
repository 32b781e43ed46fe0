use serde::{Deserialize, Serialize};

/// One running process as reported by a device agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Resident memory in bytes.
    #[serde(default)]
    pub ram_used: u64,
}

/// One disk or mount point as reported by a device agent. Sizes are in bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    pub name: String,
    pub size: u64,
    pub used_size: u64,
}

impl DiskRecord {
    pub fn free_size(&self) -> u64 {
        self.size.saturating_sub(self.used_size)
    }
}
