//! Dispatch errors.

use mdm_errors::MdmError;

/// Task dispatch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The immediate queue is at capacity and the caller did not wait
    #[error("task queue is full (capacity {capacity})")]
    Full {
        /// Queue capacity
        capacity: usize,
    },
}

impl From<DispatchError> for MdmError {
    fn from(e: DispatchError) -> Self {
        MdmError::Dispatch(e.to_string())
    }
}
