//! Configuration for the device management runtime.
//!
//! Three kinds of configuration are handled here:
//!
//! - [`ConnectionSettings`]: identity and endpoint strings persisted in the
//!   `prov` namespace, read once at boot by [`ConfigurationStore::load`].
//! - [`DeviceConfiguration`]: per-device document fetched from the backend
//!   after the network comes up.
//! - [`RuntimeSettings`]: tunables of the runtime itself (timeouts, buffer
//!   sizes, intervals), all defaulted.
//!
//! Provisioning documents pushed by the backend replace the persisted
//! namespace wholesale through [`ConfigurationStore::apply_provisioning`].

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod device;
pub mod error;
pub mod provisioning;
pub mod remote;
pub mod settings;
pub mod store;

pub use device::DeviceConfiguration;
pub use error::ConfigError;
pub use provisioning::ProvisioningSet;
pub use remote::{fetch_device_configuration, fetch_provisioning};
pub use settings::{ConnectionSettings, Endpoints, RuntimeSettings};
pub use store::{ConfigurationStore, PROVISIONING_NAMESPACE};
