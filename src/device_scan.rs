//! Scan entry points keyed by device id, as used by the device service layer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::device::{Device, DeviceRepository};
use crate::error::ScanResult;
use crate::order::OrderStatus;
use crate::order_service::OrderDispatchService;
use crate::scan::{ScanHandlerService, ScanPayload};
use crate::types::{DiskRecord, ProcessRecord};

#[derive(Clone)]
pub struct DeviceScanService {
    devices: Arc<dyn DeviceRepository>,
    orders: OrderDispatchService,
    handlers: ScanHandlerService,
    timeout: Duration,
}

impl DeviceScanService {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        orders: OrderDispatchService,
        handlers: ScanHandlerService,
        timeout: Duration,
    ) -> Self {
        Self {
            devices,
            orders,
            handlers,
            timeout,
        }
    }

    /// Running processes of the device `device_id`.
    pub async fn get_process_by_id(&self, device_id: &str) -> ScanResult<Vec<ProcessRecord>> {
        let device = self.devices.get_device_by_id(device_id)?;
        self.scan_device(&device).await
    }

    /// Disk inventory of the device `device_id`.
    pub async fn get_disks_by_id(&self, device_id: &str) -> ScanResult<Vec<DiskRecord>> {
        let device = self.devices.get_device_by_id(device_id)?;
        self.scan_device(&device).await
    }

    /// One order, one wait, no retry.
    pub async fn scan_device<T: ScanPayload>(&self, device: &Device) -> ScanResult<T> {
        let mut order = self.orders.create_order(device, T::KIND)?;
        let handle = self.handlers.handler::<T>(&order)?;

        if let Err(e) = self.orders.send(&order).await {
            order.settle(OrderStatus::Failed);
            warn!(correlation_id = %order.id(), device_id = %device.id, error = %e, "order not sent");
            return Err(e);
        }

        let result = handle.wait(self.timeout).await;
        let status = match &result {
            Ok(_) => OrderStatus::Completed,
            Err(e) if e.is_timeout() => OrderStatus::TimedOut,
            Err(_) => OrderStatus::Failed,
        };
        order.settle(status);
        match &result {
            Ok(_) => info!(
                correlation_id = %order.id(),
                device_id = %device.id,
                kind = %order.kind(),
                created_at = %order.created_at_rfc3339(),
                status = ?order.status(),
                "scan finished"
            ),
            Err(e) => warn!(
                correlation_id = %order.id(),
                device_id = %device.id,
                kind = %order.kind(),
                status = ?order.status(),
                error = %e,
                "scan failed"
            ),
        }
        result
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
