//! Configuration errors.

use mdm_errors::{MdmError, ValidationError};
use mdm_platform::{StoreError, TransportError};

/// Configuration and provisioning failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Persisted store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Required persisted key is absent
    #[error("required setting '{0}' is not provisioned")]
    MissingSetting(String),

    /// Document violates its schema; nothing was changed
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Request did not complete
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backend answered with a non-success status
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// Status code
        status: u16,
    },

    /// Body was not JSON
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse {
        /// Requested URL
        url: String,
        /// Decoder message
        reason: String,
    },

    /// Runtime settings file could not be read
    #[error("cannot read settings: {0}")]
    SettingsFile(String),
}

impl From<ConfigError> for MdmError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Store(s) => s.into(),
            ConfigError::Invalid(v) => v.into(),
            ConfigError::Transport(t) => t.into(),
            ConfigError::Status { .. } => MdmError::Transport(e.to_string()),
            ConfigError::InvalidResponse { .. } => MdmError::MalformedResponse(e.to_string()),
            ConfigError::MissingSetting(_) | ConfigError::SettingsFile(_) => MdmError::Storage(e.to_string()),
        }
    }
}
