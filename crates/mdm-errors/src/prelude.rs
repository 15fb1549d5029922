//! Convenience re-exports.
//!
//! ```
//! use mdm_errors::prelude::*;
//!
//! let err = MdmError::lifecycle("backend connection lost");
//! assert_eq!(err.category(), ErrorCategory::Lifecycle);
//! ```

pub use crate::Result;
pub use crate::common::{ErrorCategory, ErrorContext, ErrorSeverity, MdmError, ResultExt};
pub use crate::validation::ValidationError;
