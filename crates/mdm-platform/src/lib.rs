//! Narrow interfaces to the collaborators the runtime does not own.
//!
//! Socket and TLS plumbing, the persisted key/value encoding, the radio link,
//! the messaging broker and the restart primitive all live behind traits in
//! this crate. Each trait ships with a host implementation so that the
//! runtime can run as a regular process and be exercised in tests:
//!
//! | Trait | Host implementation |
//! |---|---|
//! | [`Clock`] | [`SystemClock`], [`ManualClock`] |
//! | [`HttpClient`] | [`ReqwestClient`] |
//! | [`KeyValueStore`] | [`MemoryStore`], [`JsonFileStore`] |
//! | [`NetworkLink`] | [`HostNetwork`] |
//! | [`BackendLink`] | [`LoopbackBackend`] |
//! | [`DeviceControl`] | provided by the embedding binary |

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod clock;
pub mod device;
pub mod error;
pub mod http;
pub mod network;
pub mod store;

pub use backend::{
    BackendEvent, BackendHandler, BackendLink, LoopbackBackend, OutboundMessage, SessionOptions,
    topic_matches,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{DeviceControl, ResetReason};
pub use error::{StoreError, TransportError};
pub use http::{BodyStream, HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient};
pub use network::{HostNetwork, LinkEvent, LinkHandler, NetworkLink};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, WriteBatch, WriteOp};
