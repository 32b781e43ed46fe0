use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::ScanConfig;
use crate::device::DeviceRepository;
use crate::device_scan::DeviceScanService;
use crate::dispatcher::{DispatchStats, ReplyDispatcher};
use crate::error::{ScanError, ScanResult};
use crate::listener::Listeners;
use crate::order_service::{OrderDispatchService, ReplyPorts};
use crate::pending::PendingWaits;
use crate::scan::ScanHandlerService;

/// The assembled scan core: listeners running, services wired to one wait table.
///
/// Created once per process with [`ScanRuntime::start`]; [`ScanRuntime::shutdown`]
/// stops the listeners and abandons whatever is still pending.
pub struct ScanRuntime {
    waits: Arc<PendingWaits>,
    dispatcher: ReplyDispatcher,
    listeners: Listeners,
    orders: OrderDispatchService,
    handlers: ScanHandlerService,
    devices: DeviceScanService,
}

impl ScanRuntime {
    pub async fn start(config: ScanConfig, devices: Arc<dyn DeviceRepository>) -> ScanResult<Self> {
        config
            .validate()
            .map_err(|e| ScanError::InvalidConfig(format!("{e:#}")))?;
        let config = Arc::new(config);
        let waits = Arc::new(PendingWaits::new());
        let dispatcher = ReplyDispatcher::new(Arc::clone(&waits));
        let listeners = Listeners::start(&config, dispatcher.clone()).await?;

        let reply_ports = ReplyPorts {
            tcp: listeners.tcp_addr().port(),
            udp: listeners.udp_addr().port(),
        };
        let orders = OrderDispatchService::new(Arc::clone(&config), reply_ports);
        let handlers = ScanHandlerService::new(Arc::clone(&waits));
        let device_scans = DeviceScanService::new(
            devices,
            orders.clone(),
            handlers.clone(),
            config.reply_timeout(),
        );

        Ok(Self {
            waits,
            dispatcher,
            listeners,
            orders,
            handlers,
            devices: device_scans,
        })
    }

    pub fn devices(&self) -> &DeviceScanService {
        &self.devices
    }

    pub fn orders(&self) -> &OrderDispatchService {
        &self.orders
    }

    pub fn handlers(&self) -> &ScanHandlerService {
        &self.handlers
    }

    pub fn dispatcher(&self) -> &ReplyDispatcher {
        &self.dispatcher
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.listeners.tcp_addr()
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.listeners.udp_addr()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub async fn shutdown(self) -> DispatchStats {
        self.listeners.shutdown().await;
        let abandoned = self.waits.drain();
        let stats = self.dispatcher.stats();
        info!(
            abandoned,
            delivered = stats.delivered,
            unknown = stats.unknown,
            decode_failures = stats.decode_failures,
            "scan runtime stopped"
        );
        stats
    }
}
