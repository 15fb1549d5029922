//! Concurrency backbone of the runtime.
//!
//! Exactly one thread, the dispatch thread, calls [`TaskQueue::process`] and
//! owns all lifecycle state. Every other execution context (network
//! callbacks, broker callbacks, timers) either touches only the thread-safe
//! primitives in this crate or enqueues a continuation.
//!
//! - [`TaskQueue`]: bounded FIFO of closures plus a deadline-ordered delayed
//!   list.
//! - [`EventBroadcaster`]: append-only subscriber list with synchronous
//!   fan-out, optionally marshaled onto the queue.
//! - [`Signal`]: level-triggered wakeup used by background workers.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod broadcaster;
pub mod error;
pub mod signal;
pub mod task_queue;

pub use broadcaster::EventBroadcaster;
pub use error::DispatchError;
pub use signal::Signal;
pub use task_queue::{Task, TaskQueue};
