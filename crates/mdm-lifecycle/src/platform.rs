//! Collaborators the runtime is wired to.

use std::sync::Arc;

use mdm_firmware_update::PartitionTable;
use mdm_platform::{BackendLink, Clock, DeviceControl, HttpClient, KeyValueStore, NetworkLink};
use mdm_telemetry::CoreDumpStorage;

/// Everything the runtime consumes but does not own.
#[derive(Clone)]
pub struct Platform {
    /// Persisted key/value store
    pub store: Arc<dyn KeyValueStore>,
    /// HTTP transport
    pub http: Arc<dyn HttpClient>,
    /// Network link
    pub network: Arc<dyn NetworkLink>,
    /// Messaging backend
    pub backend: Arc<dyn BackendLink>,
    /// Firmware partitions
    pub partitions: Arc<dyn PartitionTable>,
    /// Restart control
    pub device: Arc<dyn DeviceControl>,
    /// Monotonic clock
    pub clock: Arc<dyn Clock>,
    /// Crash dump left by the previous boot, when the target keeps one
    pub core_dump: Option<Arc<dyn CoreDumpStorage>>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("core_dump", &self.core_dump.is_some())
            .finish_non_exhaustive()
    }
}

/// Fixed facts about the running device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable hardware identifier, used as the backend client id and in topics
    pub device_id: String,
    /// Chip model reported with core dumps
    pub chip: String,
    /// Version of the running firmware
    pub firmware_version: String,
}

impl DeviceIdentity {
    /// Identity with the given id.
    pub fn new(device_id: impl Into<String>, chip: impl Into<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            chip: chip.into(),
            firmware_version: firmware_version.into(),
        }
    }
}
