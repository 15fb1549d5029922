//! Top-level error type and classification shared by every runtime crate.
//!
//! Component errors convert into [`MdmError`]; callers inspect
//! [`MdmError::category`] to pick a recovery policy.

use core::fmt;

use crate::ValidationError;

/// Top-level error type wrapping all component failures.
#[derive(Debug, thiserror::Error)]
pub enum MdmError {
    /// Transient I/O failure (timeout, reset, refused connection).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A backend response was missing a field or had a mistyped field.
    #[error("Invalid response: {0}")]
    MalformedResponse(String),

    /// An invariant was violated before any side effect.
    #[error("Invalid argument: {0}")]
    Validation(#[from] ValidationError),

    /// Persisted store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Firmware download or flash failure.
    #[error("Firmware error: {0}")]
    Firmware(String),

    /// Fatal lifecycle failure; the device restarts.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Task dispatch failure (queue full, queue closed).
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Local file or socket failure
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Anything without a better category
    #[error("{0}")]
    Other(String),
}

impl MdmError {
    /// Category used to pick a recovery policy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MdmError::Transport(_) => ErrorCategory::Transport,
            MdmError::MalformedResponse(_) => ErrorCategory::MalformedResponse,
            MdmError::Validation(_) => ErrorCategory::InvalidArgument,
            MdmError::Storage(_) => ErrorCategory::Storage,
            MdmError::Firmware(_) => ErrorCategory::Firmware,
            MdmError::Lifecycle(_) => ErrorCategory::Lifecycle,
            MdmError::Dispatch(_) => ErrorCategory::Dispatch,
            MdmError::Io(_) => ErrorCategory::Transport,
            MdmError::Other(_) => ErrorCategory::Other,
        }
    }

    /// Severity; only [`ErrorSeverity::Critical`] ends in a restart.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MdmError::Transport(_) | MdmError::Io(_) => ErrorSeverity::Warning,
            MdmError::Validation(e) => e.severity(),
            MdmError::Lifecycle(_) => ErrorSeverity::Critical,
            MdmError::MalformedResponse(_)
            | MdmError::Storage(_)
            | MdmError::Firmware(_)
            | MdmError::Dispatch(_)
            | MdmError::Other(_) => ErrorSeverity::Error,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Whether the failure requires a device restart.
    pub fn requires_restart(&self) -> bool {
        self.severity() >= ErrorSeverity::Critical
    }

    /// Create a transport error with a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        MdmError::Transport(msg.into())
    }

    /// Create a malformed-response error with a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        MdmError::MalformedResponse(msg.into())
    }

    /// Create a fatal lifecycle error with a message.
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        MdmError::Lifecycle(msg.into())
    }

    /// Prefix the message with `ctx`, keeping the category.
    pub fn in_context(self, ctx: &ErrorContext) -> Self {
        let msg = format!("{ctx}: {self}");
        match self.category() {
            ErrorCategory::Transport => MdmError::Transport(msg),
            ErrorCategory::MalformedResponse => MdmError::MalformedResponse(msg),
            ErrorCategory::InvalidArgument => match self.severity() {
                ErrorSeverity::Warning => MdmError::Validation(ValidationError::Precondition(msg)),
                _ => MdmError::Validation(ValidationError::ConstraintViolation(msg)),
            },
            ErrorCategory::Storage => MdmError::Storage(msg),
            ErrorCategory::Firmware => MdmError::Firmware(msg),
            ErrorCategory::Lifecycle => MdmError::Lifecycle(msg),
            ErrorCategory::Dispatch => MdmError::Dispatch(msg),
            ErrorCategory::Other => MdmError::Other(msg),
        }
    }

    /// Uncategorised failure.
    pub fn other(msg: impl Into<String>) -> Self {
        MdmError::Other(msg.into())
    }
}

impl From<std::io::Error> for MdmError {
    fn from(e: std::io::Error) -> Self {
        MdmError::Io(e)
    }
}

/// Coarse failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Transient I/O errors
    Transport = 0,
    /// Missing or mistyped response fields
    MalformedResponse = 1,
    /// Invariant violations rejected before side effects
    InvalidArgument = 2,
    /// Persisted store errors
    Storage = 3,
    /// Firmware update errors
    Firmware = 4,
    /// Fatal lifecycle errors
    Lifecycle = 5,
    /// Task dispatch errors
    Dispatch = 6,
    /// Other errors
    Other = 255,
}

impl ErrorCategory {
    /// Stable name, as logged.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Transport => "Transport",
            ErrorCategory::MalformedResponse => "MalformedResponse",
            ErrorCategory::InvalidArgument => "InvalidArgument",
            ErrorCategory::Storage => "Storage",
            ErrorCategory::Firmware => "Firmware",
            ErrorCategory::Lifecycle => "Lifecycle",
            ErrorCategory::Dispatch => "Dispatch",
            ErrorCategory::Other => "Other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ErrorSeverity {
    /// Nothing to do
    Info = 0,
    /// Logged, the operation may be retried
    Warning = 1,
    /// The operation failed
    Error = 2,
    /// The device must restart
    Critical = 3,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARN",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        })
    }
}

/// Operation name plus key/value details attached to a failure.
///
/// A failure logged before a restart is only diagnosable from the uploaded
/// telemetry, so the details travel inside the message text.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Failed operation
    pub operation: String,
    /// Details in insertion order
    pub fields: Vec<(String, String)>,
}

impl ErrorContext {
    /// Context for `operation` with no details.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            fields: Vec::new(),
        }
    }

    /// Append a detail.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation: {}", self.operation)?;
        self.fields
            .iter()
            .try_for_each(|(key, value)| write!(f, ", {key}: {value}"))
    }
}

/// Attach an [`ErrorContext`] while converting into [`MdmError`].
///
/// The category of the wrapped error survives, so retry decisions still work
/// on the result.
pub trait ResultExt<T> {
    /// Prefix the error with `ctx`.
    fn context(self, ctx: ErrorContext) -> Result<T, MdmError>;

    /// Prefix the error with a bare operation name.
    fn with_context(self, operation: impl Into<String>) -> Result<T, MdmError>;
}

impl<T, E: Into<MdmError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, ctx: ErrorContext) -> Result<T, MdmError> {
        self.map_err(|e| Into::<MdmError>::into(e).in_context(&ctx))
    }

    fn with_context(self, operation: impl Into<String>) -> Result<T, MdmError> {
        self.context(ErrorContext::new(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Transport.to_string(), "Transport");
        assert_eq!(ErrorCategory::Lifecycle.to_string(), "Lifecycle");
    }

    #[test]
    fn test_severity_is_ordered() {
        let mut levels = [
            ErrorSeverity::Critical,
            ErrorSeverity::Info,
            ErrorSeverity::Error,
            ErrorSeverity::Warning,
        ];
        levels.sort();
        assert_eq!(
            levels,
            [ErrorSeverity::Info, ErrorSeverity::Warning, ErrorSeverity::Error, ErrorSeverity::Critical]
        );
    }

    #[test]
    fn test_error_context() {
        let ctx = ErrorContext::new("ensure_token")
            .with("url", "https://auth.example/token")
            .with("status", "503");
        assert!(ctx.to_string().contains("ensure_token"));
        assert!(ctx.to_string().contains("status: 503"));
    }

    #[test]
    fn test_lifecycle_requires_restart() {
        assert!(MdmError::lifecycle("lost backend").requires_restart());
        assert!(!MdmError::transport("timeout").requires_restart());
    }

    #[test]
    fn test_context_keeps_category() -> Result<(), Box<dyn std::error::Error>> {
        let result: std::result::Result<(), MdmError> = Err(MdmError::transport("reset"));
        let err = result
            .with_context("upload_logs")
            .err()
            .ok_or("context swallowed the error")?;
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(err.to_string().contains("upload_logs"));
        Ok(())
    }
}
