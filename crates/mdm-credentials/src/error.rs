//! Credential errors.

use mdm_errors::MdmError;
use mdm_platform::TransportError;

/// Token exchange failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Request did not complete
    #[error("token request failed: {0}")]
    Transport(#[from] TransportError),

    /// Token endpoint answered with a non-success status
    #[error("token endpoint answered with status {0}")]
    Status(u16),

    /// Response body was not JSON or lacked a required field
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl From<CredentialError> for MdmError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Transport(t) => t.into(),
            CredentialError::Status(_) => MdmError::Transport(e.to_string()),
            CredentialError::InvalidResponse(_) => MdmError::MalformedResponse(e.to_string()),
        }
    }
}
