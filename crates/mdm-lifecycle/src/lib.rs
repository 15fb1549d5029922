//! Boot, connect and ready lifecycle of the device.
//!
//! ```text
//! Boot -> StorageReady -> NetworkConnecting -> NetworkAvailable
//!      -> ConfigLoading -> [OTACheck] -> BackendConnecting -> Ready
//! ```
//!
//! Every arrow is taken in response to an event: the store opening, the link
//! coming up, the configuration document arriving, the broker accepting the
//! session. [`LifecycleState::on`] is the whole transition table.
//!
//! Restart is the only recovery. Network association running out of
//! attempts, a configuration document that fails validation, the backend
//! session dropping and a failed provisioning request all end the boot with
//! a restart, after the shutdown hooks (telemetry drain first) have run.
//!
//! Once `Ready`, broadcast notifications on `iotsupport/updates/*` carrying
//! this device's client id restart the device (configuration, firmware) or
//! fetch and apply provisioning before restarting.
//!
//! # Example
//!
//! ```ignore
//! use mdm_lifecycle::prelude::*;
//!
//! let runtime = Runtime::new(platform, identity, RuntimeSettings::default(), Some(capture));
//! runtime.events().commands.subscribe(|command| handle(command));
//! runtime.boot()?;
//! let reason = runtime.run_until_restart(Duration::from_millis(100));
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod prelude;
pub mod remote;
pub mod runtime;
pub mod state;
pub mod topics;

pub use error::LifecycleError;
pub use orchestrator::{Command, LifecycleEvents, LifecycleOrchestrator, ShutdownHook};
pub use platform::{DeviceIdentity, Platform};
pub use remote::{RemoteAction, classify};
pub use runtime::Runtime;
pub use state::{LifecycleEvent, LifecycleState};
pub use topics::{LAST_WILL_PAYLOAD, Topics, UpdateKind};
