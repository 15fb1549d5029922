//! Common imports for telemetry users.

pub use crate::coredump::{CoreDumpStorage, CoreDumpUploader};
pub use crate::error::TelemetryError;
pub use crate::layer::{CaptureGuard, CaptureLayer};
pub use crate::uploader::{DrainReport, TelemetryHandle, TelemetryUploader, UploaderSettings};
