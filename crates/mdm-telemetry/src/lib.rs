//! Diagnostic log capture and upload
//!
//! Every log line at INFO or above is copied into a bounded in-memory ring
//! by [`CaptureLayer`]. A [`TelemetryUploader`] worker ships the ring to the
//! log endpoint as newline-delimited JSON once the device entity id is known
//! and the backend is reachable, retrying failed batches without limit.
//! Before a restart, [`TelemetryHandle::drain`] gives the worker a bounded
//! window to empty the backlog.
//!
//! [`CoreDumpUploader`] sends a crash dump left by the previous boot.
//!
//! # Example
//!
//! ```ignore
//! use mdm_telemetry::prelude::*;
//! use tracing_subscriber::prelude::*;
//!
//! let layer = CaptureLayer::default();
//! let context = layer.context();
//! tracing_subscriber::registry().with(layer).init();
//!
//! let uploader = TelemetryUploader::start(UploaderSettings::new(url), http, clock)?;
//! let _guard = context.attach(uploader.handle());
//! uploader.handle().set_entity_id("sensor.kitchen");
//! uploader.handle().set_connected(true);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod buffer;
pub mod coredump;
pub mod error;
pub mod layer;
pub mod prelude;
pub mod record;
pub mod uploader;

pub use buffer::{DEFAULT_CAPACITY, LogRing};
pub use coredump::{CoreDumpHeader, CoreDumpOutcome, CoreDumpStorage, CoreDumpUploader, FileCoreDump, MemoryCoreDump};
pub use error::TelemetryError;
pub use layer::{CaptureContext, CaptureGuard, CaptureLayer};
pub use record::{LogMessage, encode_batch};
pub use uploader::{DEFAULT_BATCH_SIZE, DrainReport, TelemetryHandle, TelemetryUploader, UploaderSettings};
