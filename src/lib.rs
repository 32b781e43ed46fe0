//! Library crate for fleet-scan-rs: on-demand process and disk scans of remote
//! devices over an asynchronous order/reply protocol.
pub mod config;
pub mod device;
pub mod device_scan;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod order;
pub mod order_service;
pub mod pending;
pub mod runtime;
pub mod scan;
pub mod types;
pub mod wire;

pub use error::{ScanError, ScanResult};
pub use runtime::ScanRuntime;
