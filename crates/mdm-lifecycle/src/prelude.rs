//! Common imports for embedding the runtime.

pub use crate::error::LifecycleError;
pub use crate::orchestrator::{Command, LifecycleEvents};
pub use crate::platform::{DeviceIdentity, Platform};
pub use crate::runtime::Runtime;
pub use crate::state::{LifecycleEvent, LifecycleState};
pub use crate::topics::{Topics, UpdateKind};
