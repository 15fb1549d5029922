//! Shared test utilities for the device management runtime.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`http`] - Scripted [`HttpClient`](mdm_platform::HttpClient)
//! - [`fakes`] - Recording network link and device control
//! - [`fixtures`] - Firmware image builder
//! - [`prelude`] - Convenience re-exports
//!
//! ```rust,ignore
//! use mdm_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]

pub mod fakes;
pub mod fixtures;
pub mod http;
pub mod must;
pub mod prelude;

pub use must::{must, must_some, must_with};
