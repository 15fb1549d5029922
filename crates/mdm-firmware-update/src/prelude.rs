//! Common imports for firmware update callers.

pub use crate::engine::{EngineState, FirmwareRequest, InstallOutcome, OtaUpdateEngine};
pub use crate::error::{FirmwareUpdateError, PartitionError};
pub use crate::image::FirmwareHeader;
pub use crate::partition::{MemoryPartitionTable, Partition, PartitionKind, PartitionTable};
pub use crate::plan::UpdatePlanner;
