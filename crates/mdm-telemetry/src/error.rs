//! Telemetry error types

use mdm_errors::MdmError;
use mdm_platform::TransportError;

/// Errors raised while uploading telemetry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    /// Upload did not reach the server
    #[error("telemetry upload failed: {0}")]
    Transport(#[from] TransportError),

    /// Server refused the upload
    #[error("{url} answered {status}")]
    Status {
        /// Endpoint
        url: String,
        /// HTTP status
        status: u16,
    },

    /// Stored core dump is unusable
    #[error("invalid core dump: {0}")]
    InvalidCoreDump(String),

    /// Core dump storage failed
    #[error("core dump storage failed: {0}")]
    Storage(String),

    /// Endpoint URL does not parse
    #[error("invalid endpoint '{url}': {reason}")]
    Endpoint {
        /// Rejected URL
        url: String,
        /// Parser message
        reason: String,
    },
}

impl From<TelemetryError> for MdmError {
    fn from(e: TelemetryError) -> Self {
        match e {
            TelemetryError::Transport(t) => t.into(),
            TelemetryError::Status { .. } => MdmError::Transport(e.to_string()),
            TelemetryError::InvalidCoreDump(_) => MdmError::MalformedResponse(e.to_string()),
            TelemetryError::Storage(_) => MdmError::Storage(e.to_string()),
            TelemetryError::Endpoint { .. } => MdmError::other(e.to_string()),
        }
    }
}
