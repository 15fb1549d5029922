//! Invariant violations.
//!
//! These are raised before any side effect so that a rejected operation never
//! leaves partial state behind.

use crate::ErrorSeverity;

/// A document or argument that cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Key absent from the document
    #[error("Required field '{0}' is missing")]
    Required(String),

    /// Field present with the wrong type
    #[error("Field '{field}' has the wrong type: expected {expected}")]
    WrongType {
        /// Field name
        field: String,
        /// Expected JSON type
        expected: String,
    },

    /// Present and typed correctly but unusable
    #[error("Invalid format for field '{field}': {reason}")]
    InvalidFormat {
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Operation attempted before a prerequisite is known
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// Any other rejected value
    #[error("Rejected: {0}")]
    ConstraintViolation(String),
}

impl ValidationError {
    /// `field` does not hold a value of type `expected`.
    pub fn wrong_type(field: impl Into<String>, expected: impl Into<String>) -> Self {
        ValidationError::WrongType {
            field: field.into(),
            expected: expected.into(),
        }
    }

    /// `field` is unusable for `reason`.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Severity of the violation.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ValidationError::Precondition(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Field name associated with the error, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::Required(field) => Some(field),
            ValidationError::WrongType { field, .. } => Some(field),
            ValidationError::InvalidFormat { field, .. } => Some(field),
            ValidationError::Precondition(_) | ValidationError::ConstraintViolation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_accessor() {
        assert_eq!(
            ValidationError::Required("deviceEntityId".into()).field(),
            Some("deviceEntityId")
        );
        assert_eq!(
            ValidationError::wrong_type("enableOTA", "bool").field(),
            Some("enableOTA")
        );
        assert_eq!(ValidationError::Precondition("x".into()).field(), None);
    }
}
