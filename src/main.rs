use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_scan_rs::config::{self, ScanConfig};
use fleet_scan_rs::device::{Device, DeviceRepository, InMemoryDeviceRepository};
use fleet_scan_rs::types::{DiskRecord, ProcessRecord};
use fleet_scan_rs::ScanRuntime;

/// fleet-scan — on-demand process and disk scans of remote devices.
#[derive(Debug, Parser)]
#[command(name = "fleet-scan", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Address the reply listeners bind to.
    #[arg(long, global = true)]
    listen_host: Option<IpAddr>,

    /// TCP reply listener port.
    #[arg(long, global = true)]
    tcp_port: Option<u16>,

    /// UDP reply listener port.
    #[arg(long, global = true)]
    udp_port: Option<u16>,

    /// Log level filter, overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Process,
    Disk,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reply listeners until Ctrl+C.
    Serve,
    /// Send one scan order and print the device's reply.
    Scan {
        #[arg(long, value_enum)]
        kind: Kind,

        /// IPv4 address of an ad-hoc device.
        #[arg(long, conflicts_with_all = ["devices", "device_id"])]
        address: Option<String>,

        /// Deploy path reported for the ad-hoc device.
        #[arg(long, default_value = "/")]
        deploy_path: String,

        /// JSON device list to look the device up in.
        #[arg(long, requires = "device_id")]
        devices: Option<PathBuf>,

        #[arg(long, requires = "devices")]
        device_id: Option<String>,

        /// Reply timeout in seconds.
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,

        /// Write results as pretty JSON to this path (optional).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let mut cfg = match cli.config.as_deref() {
        Some(path) => config::load_config(path)?,
        None => ScanConfig::default(),
    };
    if let Some(host) = cli.listen_host {
        cfg.listen.host = host;
    }
    if let Some(port) = cli.tcp_port {
        cfg.listen.tcp_port = port;
    }
    if let Some(port) = cli.udp_port {
        cfg.listen.udp_port = port;
    }

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Scan {
            kind,
            address,
            deploy_path,
            devices,
            device_id,
            timeout_secs,
            output,
        } => {
            if let Some(secs) = timeout_secs {
                cfg.scan.reply_timeout_ms = secs.saturating_mul(1000);
            }
            cfg.validate()?;
            let (repo, device_id) = match (address, devices, device_id) {
                (Some(address), _, _) => {
                    let repo = InMemoryDeviceRepository::new();
                    repo.insert(Device::new("adhoc", "adhoc", address, &deploy_path));
                    (repo, "adhoc".to_string())
                }
                (None, Some(path), Some(id)) => (InMemoryDeviceRepository::load_from_path(path)?, id),
                _ => bail!("either --address or --devices with --device-id is required"),
            };
            scan(cfg, Arc::new(repo), &device_id, kind, output.as_deref()).await
        }
    }
}

fn init_logging(log_level: &str, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize json logging")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty logging")?,
    }
    Ok(())
}

async fn serve(cfg: ScanConfig) -> Result<()> {
    let runtime = ScanRuntime::start(cfg, Arc::new(InMemoryDeviceRepository::new())).await?;
    println!(
        "Listening for replies on tcp {} and udp {} (Ctrl+C to stop)",
        runtime.tcp_addr(),
        runtime.udp_addr()
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown requested");
    let stats = runtime.shutdown().await;
    println!(
        "Replies delivered: {}, unknown: {}, malformed: {}",
        stats.delivered, stats.unknown, stats.decode_failures
    );
    Ok(())
}

async fn scan(
    cfg: ScanConfig,
    repo: Arc<dyn DeviceRepository>,
    device_id: &str,
    kind: Kind,
    output: Option<&Path>,
) -> Result<()> {
    let runtime = ScanRuntime::start(cfg, repo).await?;
    let outcome = match kind {
        Kind::Process => runtime
            .devices()
            .get_process_by_id(device_id)
            .await
            .map(|records| {
                print_process_table(&records);
                write_output(output, &records)
            }),
        Kind::Disk => runtime
            .devices()
            .get_disks_by_id(device_id)
            .await
            .map(|records| {
                print_disk_table(&records);
                write_output(output, &records)
            }),
    };
    runtime.shutdown().await;
    outcome.with_context(|| format!("{kind:?} scan of device {device_id} failed"))?
}

const MAX_NAME_CHARS: usize = 40;

/// Process names are cut by characters; agents report non-ASCII names.
fn table_name(name: &str) -> String {
    name.chars().take(MAX_NAME_CHARS).collect()
}

fn process_rows(records: &[ProcessRecord]) -> Vec<String> {
    let names: Vec<String> = records.iter().map(|r| table_name(&r.name)).collect();
    let name_w = names
        .iter()
        .map(|n| n.chars().count())
        .max()
        .unwrap_or(0)
        .max("name".len());
    let mut rows = vec![
        format!("{:>8}  {:<name_w$}  {:>8}  {:>12}", "pid", "name", "priority", "ram_used"),
        format!("{:->8}  {:-<name_w$}  {:->8}  {:->12}", "", "", "", ""),
    ];
    for (r, name) in records.iter().zip(names) {
        let priority = r.priority.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        rows.push(format!(
            "{:>8}  {:<name_w$}  {:>8}  {:>12}",
            r.pid, name, priority, r.ram_used
        ));
    }
    rows
}

fn print_process_table(records: &[ProcessRecord]) {
    println!("\nProcesses: {}", records.len());
    for row in process_rows(records) {
        println!("{row}");
    }
}

fn print_disk_table(records: &[DiskRecord]) {
    let name_w = records
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("name".len());
    println!("\nDisks: {}", records.len());
    println!("{:<name_w$}  {:>16}  {:>16}  {:>16}", "name", "size", "used", "free");
    println!("{:-<name_w$}  {:->16}  {:->16}  {:->16}", "", "", "", "");
    for r in records {
        println!(
            "{:<name_w$}  {:>16}  {:>16}  {:>16}",
            r.name,
            r.size,
            r.used_size,
            r.free_size()
        );
    }
}

fn write_output<T: Serialize>(path: Option<&Path>, records: &T) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, records)?;
    println!("Wrote JSON results to {}", path.display());
    Ok(())
}
