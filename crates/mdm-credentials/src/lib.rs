//! Bearer credential cache.
//!
//! [`CredentialManager::ensure_token`] returns the cached credential while it
//! is more than [`EXPIRY_MARGIN_MS`] away from expiry and otherwise performs a
//! client-credentials exchange against the token endpoint. Refresh is always
//! lazy: there is no background timer.
//!
//! The manager lives on the dispatch thread and is not synchronized.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod manager;

pub use error::CredentialError;
pub use manager::{Credential, CredentialManager, CredentialSettings, DEFAULT_SCOPE, EXPIRY_MARGIN_MS};
