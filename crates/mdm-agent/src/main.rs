//! mdm-agent - device management runtime as a host process
//!
//! Runs the boot, connect and ready lifecycle against real HTTP endpoints,
//! with a JSON file standing in for the persisted store and a directory of
//! files standing in for the firmware partitions. A restart tears the
//! runtime down and boots it again in the same process.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod host;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mdm_config::{ConfigurationStore, RuntimeSettings};
use mdm_firmware_update::{OtaUpdateEngine, UpdatePlanner};
use mdm_lifecycle::{DeviceIdentity, Runtime};
use mdm_platform::{JsonFileStore, ReqwestClient};
use mdm_telemetry::{CaptureContext, CaptureLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::host::DataDir;

#[derive(Debug, Parser)]
#[command(name = "mdm-agent")]
#[command(about = "Device management runtime: configuration, firmware updates and log upload")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Runtime settings file (JSON); missing fields take their defaults
    #[arg(long, global = true, env = "MDM_SETTINGS")]
    settings: Option<PathBuf>,

    /// Directory holding the store, partitions and core dump
    #[arg(long, global = true, env = "MDM_DATA_DIR", default_value = "mdm-data")]
    data_dir: PathBuf,

    /// Emulate the single-slot layout (factory plus one update slot)
    #[arg(long, global = true)]
    single_slot: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Boot the runtime and keep rebooting it on restart requests
    Run {
        /// Hardware identifier used as backend client id
        #[arg(long, env = "MDM_DEVICE_ID")]
        device_id: String,

        /// Chip model reported with core dumps
        #[arg(long, default_value = "host")]
        chip: String,

        /// Stop after this many restarts
        #[arg(long)]
        max_restarts: Option<u32>,
    },

    /// Replace the persisted settings with a provisioning document
    Provision {
        /// JSON object of string values
        file: PathBuf,
    },

    /// Install the main application into the update slot
    Bootstrap {
        /// Firmware endpoint
        url: String,
    },
}

fn init_tracing(verbose: u8) -> Arc<CaptureContext> {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let capture = CaptureLayer::default();
    let context = capture.context();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,mdm={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(capture)
        .init();
    context
}

fn load_settings(path: Option<&Path>) -> Result<RuntimeSettings> {
    match path {
        Some(path) => RuntimeSettings::from_file(path).with_context(|| format!("settings file {}", path.display())),
        None => Ok(RuntimeSettings::default()),
    }
}

fn run(
    cli: &Cli,
    capture: Arc<CaptureContext>,
    device_id: &str,
    chip: &str,
    max_restarts: Option<u32>,
) -> Result<()> {
    let settings = load_settings(cli.settings.as_deref())?;
    let data = DataDir::new(&cli.data_dir);
    let host = host::build(&data, settings.http_timeout(), cli.single_slot)?;
    let identity = DeviceIdentity::new(device_id, chip, env!("CARGO_PKG_VERSION"));
    info!(device_id, data_dir = %data.root().display(), "starting runtime");

    loop {
        let runtime = Runtime::new(
            host.platform.clone(),
            identity.clone(),
            settings.clone(),
            Some(Arc::clone(&capture)),
        );
        runtime.boot().context("boot failed")?;
        let reason = runtime.run_until_restart(Duration::from_millis(250));
        drop(runtime);

        if max_restarts.is_some_and(|max| host.device.restarts() >= max) {
            info!(reason = %reason, "restart limit reached");
            return Ok(());
        }
        host.partitions.reboot();
        info!(reason = %reason, boot = %host.partitions.boot_label(), "rebooting runtime");
    }
}

fn provision(cli: &Cli, file: &Path) -> Result<()> {
    let data = DataDir::new(&cli.data_dir);
    std::fs::create_dir_all(data.root()).with_context(|| format!("cannot create {}", data.root().display()))?;
    let text = std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text).context("provisioning file is not JSON")?;

    let store = ConfigurationStore::new(Arc::new(JsonFileStore::new(data.store())));
    store.prepare()?;
    store.apply_provisioning_json(&document)?;
    info!(store = %data.store().display(), "provisioning stored");
    Ok(())
}

fn bootstrap(cli: &Cli, url: &str) -> Result<()> {
    let settings = load_settings(cli.settings.as_deref())?;
    let data = DataDir::new(&cli.data_dir);
    let partitions = host::open_partitions(&data, cli.single_slot)?;
    let engine = OtaUpdateEngine::new(
        Arc::new(ReqwestClient::new(settings.http_timeout())?),
        partitions.clone(),
        settings.firmware_chunk_size,
        settings.http_timeout(),
    );
    let mut planner = UpdatePlanner::new(engine, None);
    if !planner.is_single_slot() {
        bail!("bootstrap needs --single-slot");
    }
    let installed = planner.bootstrap(url, None)?;
    info!(installed, boot = %partitions.boot_label(), "bootstrap finished");
    Ok(())
}

fn execute(cli: &Cli, capture: Arc<CaptureContext>) -> Result<()> {
    match &cli.command {
        Commands::Run {
            device_id,
            chip,
            max_restarts,
        } => run(cli, capture, device_id, chip, *max_restarts),
        Commands::Provision { file } => provision(cli, file),
        Commands::Bootstrap { url } => bootstrap(cli, url),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let capture = init_tracing(cli.verbose);

    match execute(&cli, capture) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
