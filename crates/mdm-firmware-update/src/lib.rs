//! Whole-image firmware updates for managed devices
//!
//! Firmware is streamed from an HTTP endpoint straight into an inactive
//! application partition:
//!
//! - [`image`]: fixed-layout decoding of the image and application headers
//! - [`partition`]: partition table, boot selection and sequential writers
//! - [`engine`]: the streaming installer with version and rollback checks
//! - [`plan`]: target selection for dual-slot and single-slot layouts
//! - [`error`]: error types
//!
//! The engine never restarts the device. Callers select the boot partition
//! (or let [`plan::UpdatePlanner`] do it) and restart.
//!
//! # Example
//!
//! ```ignore
//! use mdm_firmware_update::prelude::*;
//!
//! let mut engine = OtaUpdateEngine::new(http, partitions.clone(), 1024, timeout);
//! let target = partitions.next_update_partition().ok_or("no slot")?;
//! let request = FirmwareRequest::new(url, target.clone(), partitions.running());
//! if engine.install(&request)?.changed() {
//!     partitions.set_boot(&target)?;
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod engine;
pub mod error;
pub mod image;
pub mod partition;
pub mod plan;
pub mod prelude;

pub use engine::{DEFAULT_CHUNK_SIZE, EngineState, FirmwareRequest, InstallOutcome, OtaUpdateEngine};
pub use error::{FirmwareUpdateError, PartitionError};
pub use image::{AppDescriptor, FirmwareHeader, ImageError, ImageHeader, MIN_HEADER_LEN, SegmentHeader};
pub use partition::{FilePartitionTable, MemoryPartitionTable, Partition, PartitionKind, PartitionTable, PartitionWriter};
pub use plan::{FACTORY_LABEL, SINGLE_SLOT_LABEL, UpdatePlanner};
