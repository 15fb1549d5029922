//! Shared error taxonomy for the device management runtime
//!
//! Every component crate defines its own `thiserror` enum for the failures it
//! can produce. Those enums convert into [`MdmError`], which classifies the
//! failure so that the lifecycle layer can decide between retrying,
//! surfacing, and restarting the device.
//!
//! # Taxonomy
//!
//! - [`ErrorCategory::Transport`]: timeouts and connection resets. Retried by
//!   the caller's own policy.
//! - [`ErrorCategory::MalformedResponse`]: a backend answered with a body that
//!   is missing a field or has a field of the wrong type. Never defaulted.
//! - [`ErrorCategory::InvalidArgument`]: an invariant was violated before any
//!   side effect took place.
//! - [`ErrorCategory::Lifecycle`]: fatal; the device restarts.
//!
//! # Example
//!
//! ```
//! use mdm_errors::prelude::*;
//!
//! fn require_entity(id: &str) -> Result<&str> {
//!     if id.is_empty() {
//!         return Err(ValidationError::Required("deviceEntityId".into()).into());
//!     }
//!     Ok(id)
//! }
//!
//! assert!(require_entity("").is_err());
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod common;
pub mod prelude;
pub mod validation;

pub use common::{ErrorCategory, ErrorContext, ErrorSeverity, MdmError, ResultExt};
pub use validation::ValidationError;

/// A specialized `Result` type for runtime operations.
pub type Result<T> = std::result::Result<T, MdmError>;
