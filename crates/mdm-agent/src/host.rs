//! Host stand-ins for the device-only collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use mdm_firmware_update::{FilePartitionTable, MemoryPartitionTable};
use mdm_lifecycle::Platform;
use mdm_platform::{
    DeviceControl, HostNetwork, JsonFileStore, LoopbackBackend, ReqwestClient, ResetReason, SystemClock,
};
use mdm_telemetry::FileCoreDump;
use tracing::warn;

/// Size of each emulated partition.
pub const PARTITION_SIZE: u64 = 4 * 1024 * 1024;

/// Restart control for a process that reboots the runtime in place.
#[derive(Debug, Default)]
pub struct HostDevice {
    restarted: AtomicBool,
    restarts: AtomicU32,
}

impl HostDevice {
    /// Restarts requested so far.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Acquire)
    }
}

impl DeviceControl for HostDevice {
    fn restart(&self, reason: &str) {
        self.restarted.store(true, Ordering::Release);
        let count = self.restarts.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        warn!(reason, count, "restart requested");
    }

    fn reset_reason(&self) -> ResetReason {
        if self.restarted.load(Ordering::Acquire) {
            ResetReason::Software
        } else {
            ResetReason::PowerOn
        }
    }
}

/// Files the agent keeps under its data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persisted key/value store.
    pub fn store(&self) -> PathBuf {
        self.root.join("store.json")
    }

    /// Emulated partition table.
    pub fn partitions(&self) -> PathBuf {
        self.root.join("partitions")
    }

    /// Core dump left by a crashed run.
    pub fn core_dump(&self) -> PathBuf {
        self.root.join("coredump.bin")
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Open the partition table under `data`, dual-slot unless `single_slot`.
pub fn open_partitions(data: &DataDir, single_slot: bool) -> Result<Arc<MemoryPartitionTable>> {
    let layout = if single_slot {
        MemoryPartitionTable::single_slot(PARTITION_SIZE)
    } else {
        MemoryPartitionTable::dual_slot(PARTITION_SIZE)
    };
    let table = FilePartitionTable::open(&data.partitions(), layout)
        .with_context(|| format!("cannot open partitions in {}", data.partitions().display()))?;
    Ok(Arc::new(table))
}

/// Host collaborators plus the handles the restart loop needs.
pub struct HostPlatform {
    /// Wiring handed to each runtime
    pub platform: Platform,
    /// Partitions, to switch the running slot on restart
    pub partitions: Arc<MemoryPartitionTable>,
    /// Restart recorder
    pub device: Arc<HostDevice>,
}

/// Build the host platform rooted at `data`.
pub fn build(data: &DataDir, http_timeout: Duration, single_slot: bool) -> Result<HostPlatform> {
    std::fs::create_dir_all(data.root())
        .with_context(|| format!("cannot create {}", data.root().display()))?;
    let http = ReqwestClient::new(http_timeout).context("cannot build HTTP client")?;
    let partitions = open_partitions(data, single_slot)?;
    let device = Arc::new(HostDevice::default());
    let platform = Platform {
        store: Arc::new(JsonFileStore::new(data.store())),
        http: Arc::new(http),
        network: Arc::new(HostNetwork::new()),
        backend: Arc::new(LoopbackBackend::new()),
        partitions: Arc::clone(&partitions) as _,
        device: Arc::clone(&device) as _,
        clock: Arc::new(SystemClock::new()),
        core_dump: Some(Arc::new(FileCoreDump::new(data.core_dump()))),
    };
    Ok(HostPlatform {
        platform,
        partitions,
        device,
    })
}
