mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Behavior, FakeAgent};
use fleet_scan_rs::device::{Device, InMemoryDeviceRepository};
use fleet_scan_rs::order::{OrderKind, TransportKind};
use fleet_scan_rs::types::{DiskRecord, ProcessRecord};
use fleet_scan_rs::wire::{ReplyBody, ReplyEnvelope};
use fleet_scan_rs::{ScanError, ScanRuntime};
use tokio::net::UdpSocket;

fn repo_with(devices: &[Device]) -> Arc<InMemoryDeviceRepository> {
    let repo = InMemoryDeviceRepository::new();
    for d in devices {
        repo.insert(d.clone());
    }
    Arc::new(repo)
}

fn local_device(id: &str) -> Device {
    Device::new(id, id, "127.0.0.1", "/opt/suite")
}

#[tokio::test]
async fn disk_scan_over_udp_returns_agent_records() {
    let agent = FakeAgent::start(Behavior::Answer).await;
    let runtime = ScanRuntime::start(
        agent.config(Duration::from_secs(5)),
        repo_with(&[local_device("d1")]),
    )
    .await
    .unwrap();

    let disks = runtime.devices().get_disks_by_id("d1").await.unwrap();
    assert_eq!(disks.len(), 3);
    assert_eq!(disks[2].free_size(), 500);
    assert_eq!(runtime.stats().pending, 0);
    runtime.shutdown().await;
}

#[tokio::test]
async fn process_scan_over_tcp_returns_agent_records() {
    let agent = FakeAgent::start(Behavior::Answer).await;
    let runtime = ScanRuntime::start(
        agent.config(Duration::from_secs(5)),
        repo_with(&[local_device("d1")]),
    )
    .await
    .unwrap();

    let procs = runtime.devices().get_process_by_id("d1").await.unwrap();
    assert_eq!(procs.len(), 1);
    assert_eq!(procs[0].pid, 100);
    assert_eq!(runtime.stats().delivered, 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn transports_can_be_swapped_per_kind() {
    let agent = FakeAgent::start(Behavior::Answer).await;
    let mut cfg = agent.config(Duration::from_secs(5));
    cfg.transports.process_scan = TransportKind::Udp;
    cfg.transports.disk_scan = TransportKind::Tcp;
    let device = local_device("d1");
    let runtime = ScanRuntime::start(cfg, repo_with(&[device.clone()])).await.unwrap();

    let order = runtime.orders().create_order(&device, OrderKind::DiskScan).unwrap();
    assert_eq!(order.transport(), TransportKind::Tcp);
    assert_eq!(runtime.devices().get_disks_by_id("d1").await.unwrap().len(), 3);
    assert_eq!(runtime.devices().get_process_by_id("d1").await.unwrap().len(), 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn reply_for_remote_device_arrives_on_udp_listener() {
    // The device at 10.0.0.5 is simulated by writing its reply straight to our listener.
    let device = Device::new("d5", "rack-5", "10.0.0.5", "/opt");
    let runtime = ScanRuntime::start(
        FakeAgent::start(Behavior::Silent).await.config(Duration::from_secs(5)),
        repo_with(&[device.clone()]),
    )
    .await
    .unwrap();

    let order = runtime.orders().create_order(&device, OrderKind::DiskScan).unwrap();
    assert_eq!(order.target().ip().to_string(), "10.0.0.5");
    let handle = runtime.handlers().disk_scan_handler(&order).unwrap();

    let records: Vec<DiskRecord> = (0..3)
        .map(|i| DiskRecord { name: format!("/dev/sd{i}"), size: 100, used_size: 10 })
        .collect();
    let device_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let reply = ReplyEnvelope::new(order.id(), ReplyBody::Disks { records: records.clone() });
    device_socket
        .send_to(&reply.encode().unwrap(), runtime.udp_addr())
        .await
        .unwrap();

    let got = handle.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(got, records);
    runtime.shutdown().await;
}

#[tokio::test]
async fn silent_device_times_out_and_leaves_no_wait() {
    let agent = FakeAgent::start(Behavior::Silent).await;
    let timeout = Duration::from_millis(300);
    let runtime = ScanRuntime::start(agent.config(timeout), repo_with(&[local_device("d1")]))
        .await
        .unwrap();

    let start = Instant::now();
    let err = runtime.devices().get_process_by_id("d1").await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "{err}");
    assert!(elapsed >= timeout, "gave up early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(5));
    assert_eq!(runtime.stats().pending, 0);
    runtime.shutdown().await;
}

#[tokio::test]
async fn duplicate_replies_only_first_is_observed() {
    let agent = FakeAgent::start(Behavior::AnswerTwice).await;
    let runtime = ScanRuntime::start(
        agent.config(Duration::from_secs(5)),
        repo_with(&[local_device("d1")]),
    )
    .await
    .unwrap();

    let disks = runtime.devices().get_disks_by_id("d1").await.unwrap();
    assert!(disks.iter().all(|d| d.name.contains("/0/")), "{disks:?}");

    // The second copy lands after the wait is gone and is dropped silently.
    for _ in 0..100 {
        if runtime.stats().unknown == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stats = runtime.stats();
    assert_eq!((stats.delivered, stats.unknown, stats.pending), (1, 1, 0));
    runtime.shutdown().await;
}

#[tokio::test]
async fn device_reported_error_is_not_a_timeout() {
    let agent = FakeAgent::start(Behavior::Fail).await;
    let runtime = ScanRuntime::start(
        agent.config(Duration::from_secs(5)),
        repo_with(&[local_device("d1")]),
    )
    .await
    .unwrap();

    let err = runtime.devices().get_process_by_id("d1").await.unwrap_err();
    assert!(matches!(err, ScanError::DeviceReported { ref message, .. } if message.contains("process")));
    runtime.shutdown().await;
}

#[tokio::test]
async fn unknown_device_fails_before_any_order() {
    let agent = FakeAgent::start(Behavior::Answer).await;
    let runtime = ScanRuntime::start(agent.config(Duration::from_secs(5)), repo_with(&[]))
        .await
        .unwrap();

    let err = runtime.devices().get_disks_by_id("ghost").await.unwrap_err();
    assert!(matches!(err, ScanError::DeviceNotFound { ref id } if id == "ghost"));
    assert_eq!(runtime.stats(), Default::default());
    runtime.shutdown().await;
}

#[tokio::test]
async fn concurrent_scans_are_never_cross_wired() {
    let agent = FakeAgent::start(Behavior::Answer).await;
    let devices: Vec<Device> = (0..24).map(|i| local_device(&format!("d{i}"))).collect();
    let runtime = ScanRuntime::start(agent.config(Duration::from_secs(10)), repo_with(&devices))
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for (i, device) in devices.into_iter().enumerate() {
        let orders = runtime.orders().clone();
        let handlers = runtime.handlers().clone();
        tasks.spawn(async move {
            let kind = if i % 2 == 0 { OrderKind::DiskScan } else { OrderKind::ProcessScan };
            let order = orders.create_order(&device, kind).unwrap();
            let tag = order.id().to_string();
            match kind {
                OrderKind::DiskScan => {
                    let handle = handlers.disk_scan_handler(&order).unwrap();
                    orders.send(&order).await.unwrap();
                    let disks = handle.wait(Duration::from_secs(10)).await.unwrap();
                    assert!(disks.iter().all(|d| d.name.starts_with(&tag)));
                }
                OrderKind::ProcessScan => {
                    let handle = handlers.process_scan_handler(&order).unwrap();
                    orders.send(&order).await.unwrap();
                    let procs: Vec<ProcessRecord> = handle.wait(Duration::from_secs(10)).await.unwrap();
                    assert_eq!(procs[0].name, tag);
                }
            }
            order.id()
        });
    }

    let mut ids = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        assert!(ids.insert(res.unwrap()));
    }
    assert_eq!(ids.len(), 24);
    assert_eq!(runtime.stats().delivered, 24);
    assert_eq!(runtime.stats().pending, 0);
    runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_abandons_outstanding_waits() {
    let agent = FakeAgent::start(Behavior::Silent).await;
    let device = local_device("d1");
    let runtime = ScanRuntime::start(agent.config(Duration::from_secs(30)), repo_with(&[device.clone()]))
        .await
        .unwrap();

    let order = runtime.orders().create_order(&device, OrderKind::DiskScan).unwrap();
    let handle = runtime.handlers().disk_scan_handler(&order).unwrap();
    runtime.orders().send(&order).await.unwrap();

    let waiter = tokio::spawn(handle.wait(Duration::from_secs(30)));
    runtime.shutdown().await;
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, ScanError::WaitAbandoned(id) if id == order.id()));
}
