//! Convenience re-exports for common test utilities.

pub use crate::fakes::{RecordingDevice, ScriptedNetwork};
pub use crate::fixtures::ImageBuilder;
pub use crate::http::{Reply, ScriptedHttp};
pub use crate::must::{must, must_some, must_with};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
