//! Application partition management
//!
//! A device has a factory partition and one or more OTA partitions. Exactly
//! one partition is running; the bootloader starts the partition selected
//! with [`PartitionTable::set_boot`] on the next restart. A partition whose
//! image failed to boot is reported by [`PartitionTable::last_invalid`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PartitionError;
use crate::image::{APP_DESCRIPTOR_LEN, AppDescriptor, FirmwareHeader, IMAGE_HEADER_LEN, MIN_HEADER_LEN, SEGMENT_HEADER_LEN};

/// Application partition subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKind {
    /// Factory image
    Factory,
    /// OTA slot with its index
    Ota(u8),
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKind::Factory => write!(f, "factory"),
            PartitionKind::Ota(n) => write!(f, "ota_{n}"),
        }
    }
}

/// Handle to an application partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    /// Label from the partition table
    pub label: String,
    /// Subtype
    pub kind: PartitionKind,
    /// Capacity in bytes
    pub size: u64,
}

impl Partition {
    /// Build a partition handle.
    pub fn new(label: impl Into<String>, kind: PartitionKind, size: u64) -> Self {
        Self {
            label: label.into(),
            kind,
            size,
        }
    }
}

/// Sequential writer into an update partition.
///
/// Dropping a writer without calling [`finish`](Self::finish) must release
/// the partition without marking anything bootable.
pub trait PartitionWriter: Send {
    /// Append `data`.
    ///
    /// # Errors
    ///
    /// Size overflow or medium failure.
    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError>;

    /// Validate and commit the written image.
    ///
    /// # Errors
    ///
    /// [`PartitionError::Validation`] when the data is not a valid image.
    fn finish(self: Box<Self>) -> Result<(), PartitionError>;

    /// Discard everything written.
    fn abort(self: Box<Self>);
}

/// Partition table and bootloader controls.
pub trait PartitionTable: Send + Sync {
    /// Partition currently executing.
    fn running(&self) -> Partition;

    /// Partition with `label`, carrying its current subtype.
    fn find(&self, label: &str) -> Option<Partition>;

    /// First partition of `kind`.
    fn find_kind(&self, kind: PartitionKind) -> Option<Partition>;

    /// OTA slot following the running partition, if any.
    fn next_update_partition(&self) -> Option<Partition>;

    /// Descriptor of the image stored in `partition`; `None` when empty.
    ///
    /// # Errors
    ///
    /// Medium failure.
    fn app_description(&self, partition: &Partition) -> Result<Option<AppDescriptor>, PartitionError>;

    /// Partition whose image was rolled back after failing to boot.
    fn last_invalid(&self) -> Option<Partition>;

    /// Change the subtype recorded for `label`.
    ///
    /// # Errors
    ///
    /// [`PartitionError::NotFound`] for an unknown label.
    fn set_kind(&self, label: &str, kind: PartitionKind) -> Result<(), PartitionError>;

    /// Open `partition` for a sequential write. Only OTA partitions can be
    /// opened.
    ///
    /// # Errors
    ///
    /// [`PartitionError::NotUpdatable`] for a factory partition.
    fn begin_write(&self, partition: &Partition) -> Result<Box<dyn PartitionWriter>, PartitionError>;

    /// Select `partition` for the next boot.
    ///
    /// # Errors
    ///
    /// [`PartitionError::NotBootable`] when it holds no valid image.
    fn set_boot(&self, partition: &Partition) -> Result<(), PartitionError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Slot {
    partition: Option<Partition>,
    #[serde(skip)]
    image: Vec<u8>,
    descriptor: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableState {
    slots: BTreeMap<String, Slot>,
    order: Vec<String>,
    running: String,
    boot: String,
    last_invalid: Option<String>,
    writes_started: usize,
}

impl TableState {
    fn partition(&self, label: &str) -> Option<Partition> {
        self.slots.get(label).and_then(|s| s.partition.clone())
    }
}

/// In-memory partition table.
///
/// Clones share state. [`MemoryPartitionTable::reboot`] plays the
/// bootloader: the selected partition becomes the running one.
#[derive(Debug, Clone)]
pub struct MemoryPartitionTable {
    state: Arc<Mutex<TableState>>,
    persist: Option<PathBuf>,
}

impl MemoryPartitionTable {
    /// Empty table; add partitions with [`with_partition`](Self::with_partition).
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState::default())),
            persist: None,
        }
    }

    /// Factory partition plus two OTA slots, running from factory.
    pub fn dual_slot(size: u64) -> Self {
        Self::new()
            .with_partition(Partition::new("factory", PartitionKind::Factory, size))
            .with_partition(Partition::new("ota_0", PartitionKind::Ota(0), size))
            .with_partition(Partition::new("ota_1", PartitionKind::Ota(1), size))
    }

    /// Factory partition plus a single slot labelled `ota`, running from
    /// factory.
    pub fn single_slot(size: u64) -> Self {
        Self::new()
            .with_partition(Partition::new("factory", PartitionKind::Factory, size))
            .with_partition(Partition::new("ota", PartitionKind::Ota(0), size))
    }

    /// Add a partition. The first one added starts out running and bootable.
    pub fn with_partition(self, partition: Partition) -> Self {
        {
            let mut state = self.state.lock();
            if state.order.is_empty() {
                state.running = partition.label.clone();
                state.boot = partition.label.clone();
            }
            state.order.push(partition.label.clone());
            state.slots.insert(
                partition.label.clone(),
                Slot {
                    partition: Some(partition),
                    ..Slot::default()
                },
            );
        }
        self
    }

    /// Store `image` in `label` as if it had been flashed at the factory.
    ///
    /// # Errors
    ///
    /// Unknown label or an image without valid headers.
    pub fn install_image(&self, label: &str, image: &[u8]) -> Result<(), PartitionError> {
        let descriptor = descriptor_bytes(label, image)?;
        {
            let mut state = self.state.lock();
            let slot = state
                .slots
                .get_mut(label)
                .ok_or_else(|| PartitionError::NotFound(label.to_string()))?;
            slot.descriptor = Some(descriptor);
            slot.image = image.to_vec();
        }
        self.save()
    }

    /// Mark `label` as the last partition that failed to boot.
    pub fn mark_invalid(&self, label: &str) {
        self.state.lock().last_invalid = Some(label.to_string());
    }

    /// Make the selected boot partition the running one.
    pub fn reboot(&self) {
        let mut state = self.state.lock();
        state.running = state.boot.clone();
    }

    /// Label selected for the next boot.
    pub fn boot_label(&self) -> String {
        self.state.lock().boot.clone()
    }

    /// Image bytes committed to `label`.
    pub fn image(&self, label: &str) -> Option<Vec<u8>> {
        self.state.lock().slots.get(label).map(|s| s.image.clone())
    }

    /// Writes opened so far, across all partitions.
    pub fn writes_started(&self) -> usize {
        self.state.lock().writes_started
    }

    fn save(&self) -> Result<(), PartitionError> {
        let Some(dir) = &self.persist else {
            return Ok(());
        };
        let state = self.state.lock().clone();
        for (label, slot) in &state.slots {
            if slot.descriptor.is_some() {
                std::fs::write(dir.join(format!("{label}.bin")), &slot.image)
                    .map_err(|e| PartitionError::Io(e.to_string()))?;
            }
        }
        let json = serde_json::to_vec_pretty(&state).map_err(|e| PartitionError::Io(e.to_string()))?;
        std::fs::write(dir.join("table.json"), json).map_err(|e| PartitionError::Io(e.to_string()))
    }
}

impl Default for MemoryPartitionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition table persisted to a directory: one `<label>.bin` per slot plus
/// `table.json` with boot selection state.
pub struct FilePartitionTable;

impl FilePartitionTable {
    /// Open the table in `dir`, creating it from `layout` on first use.
    ///
    /// # Errors
    ///
    /// Directory or state file cannot be read or written.
    pub fn open(dir: &Path, layout: MemoryPartitionTable) -> Result<MemoryPartitionTable, PartitionError> {
        std::fs::create_dir_all(dir).map_err(|e| PartitionError::Io(e.to_string()))?;
        let state_path = dir.join("table.json");
        let table = match std::fs::read(&state_path) {
            Ok(bytes) => {
                let mut state: TableState =
                    serde_json::from_slice(&bytes).map_err(|e| PartitionError::Io(e.to_string()))?;
                for (label, slot) in &mut state.slots {
                    if slot.descriptor.is_some() {
                        slot.image = std::fs::read(dir.join(format!("{label}.bin")))
                            .map_err(|e| PartitionError::Io(e.to_string()))?;
                    }
                }
                MemoryPartitionTable {
                    state: Arc::new(Mutex::new(state)),
                    persist: Some(dir.to_path_buf()),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryPartitionTable {
                persist: Some(dir.to_path_buf()),
                ..layout
            },
            Err(e) => return Err(PartitionError::Io(e.to_string())),
        };
        table.save()?;
        Ok(table)
    }
}

fn descriptor_bytes(label: &str, image: &[u8]) -> Result<Vec<u8>, PartitionError> {
    FirmwareHeader::decode(image).map_err(|e| PartitionError::Validation {
        label: label.to_string(),
        reason: e.to_string(),
    })?;
    let start = IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN;
    image
        .get(start..start + APP_DESCRIPTOR_LEN)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PartitionError::Validation {
            label: label.to_string(),
            reason: format!("image shorter than {MIN_HEADER_LEN} bytes"),
        })
}

impl PartitionTable for MemoryPartitionTable {
    fn running(&self) -> Partition {
        let state = self.state.lock();
        state
            .partition(&state.running)
            .unwrap_or_else(|| Partition::new(state.running.clone(), PartitionKind::Factory, 0))
    }

    fn find(&self, label: &str) -> Option<Partition> {
        self.state.lock().partition(label)
    }

    fn find_kind(&self, kind: PartitionKind) -> Option<Partition> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|l| state.partition(l))
            .find(|p| p.kind == kind)
    }

    fn next_update_partition(&self) -> Option<Partition> {
        let state = self.state.lock();
        let ota: Vec<Partition> = state
            .order
            .iter()
            .filter_map(|l| state.partition(l))
            .filter(|p| matches!(p.kind, PartitionKind::Ota(_)))
            .collect();
        let next = match ota.iter().position(|p| p.label == state.running) {
            Some(i) => ota.get(i.saturating_add(1)).or_else(|| ota.first()),
            None => ota.first(),
        };
        next.filter(|p| p.label != state.running).cloned()
    }

    fn app_description(&self, partition: &Partition) -> Result<Option<AppDescriptor>, PartitionError> {
        let state = self.state.lock();
        let slot = state
            .slots
            .get(&partition.label)
            .ok_or_else(|| PartitionError::NotFound(partition.label.clone()))?;
        slot.descriptor
            .as_deref()
            .map(AppDescriptor::decode)
            .transpose()
            .map_err(|e| PartitionError::Validation {
                label: partition.label.clone(),
                reason: e.to_string(),
            })
    }

    fn last_invalid(&self) -> Option<Partition> {
        let state = self.state.lock();
        state.last_invalid.as_deref().and_then(|l| state.partition(l))
    }

    fn set_kind(&self, label: &str, kind: PartitionKind) -> Result<(), PartitionError> {
        let mut state = self.state.lock();
        let partition = state
            .slots
            .get_mut(label)
            .and_then(|s| s.partition.as_mut())
            .ok_or_else(|| PartitionError::NotFound(label.to_string()))?;
        partition.kind = kind;
        Ok(())
    }

    fn begin_write(&self, partition: &Partition) -> Result<Box<dyn PartitionWriter>, PartitionError> {
        let mut state = self.state.lock();
        let current = state
            .partition(&partition.label)
            .ok_or_else(|| PartitionError::NotFound(partition.label.clone()))?;
        if current.kind == PartitionKind::Factory {
            return Err(PartitionError::NotUpdatable(partition.label.clone()));
        }
        state.writes_started = state.writes_started.saturating_add(1);
        debug!(label = %current.label, "partition opened for writing");
        Ok(Box::new(MemoryWriter {
            table: self.clone(),
            partition: current,
            buffer: Vec::new(),
        }))
    }

    fn set_boot(&self, partition: &Partition) -> Result<(), PartitionError> {
        {
            let mut state = self.state.lock();
            let bootable = state
                .slots
                .get(&partition.label)
                .is_some_and(|s| s.descriptor.is_some());
            if !bootable {
                return Err(PartitionError::NotBootable(partition.label.clone()));
            }
            state.boot = partition.label.clone();
        }
        info!(label = %partition.label, "boot partition set");
        self.save()
    }
}

struct MemoryWriter {
    table: MemoryPartitionTable,
    partition: Partition,
    buffer: Vec<u8>,
}

impl PartitionWriter for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError> {
        let total = self.buffer.len().saturating_add(data.len());
        if u64::try_from(total).unwrap_or(u64::MAX) > self.partition.size {
            return Err(PartitionError::TooLarge {
                label: self.partition.label.clone(),
                size: self.partition.size,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), PartitionError> {
        let descriptor = descriptor_bytes(&self.partition.label, &self.buffer)?;
        {
            let mut state = self.table.state.lock();
            let slot = state
                .slots
                .get_mut(&self.partition.label)
                .ok_or_else(|| PartitionError::NotFound(self.partition.label.clone()))?;
            slot.image = self.buffer;
            slot.descriptor = Some(descriptor);
        }
        self.table.save()
    }

    fn abort(self: Box<Self>) {
        debug!(label = %self.partition.label, discarded = self.buffer.len(), "partition write aborted");
    }
}
