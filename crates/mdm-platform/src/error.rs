//! Error types for collaborator failures.

use mdm_errors::MdmError;

/// Transport-level failures (HTTP, radio, messaging broker).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer did not answer within the configured timeout
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL
        url: String,
    },

    /// Connection could not be established or was reset
    #[error("connection to {url} failed: {reason}")]
    Connection {
        /// Target URL
        url: String,
        /// Underlying error text
        reason: String,
    },

    /// Non-success HTTP status
    #[error("{url} answered with status {status}")]
    Status {
        /// Target URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body could not be read to completion
    #[error("body read failed: {0}")]
    Body(String),

    /// Link is not connected
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    /// Build a connection error.
    pub fn connection(url: impl Into<String>, reason: impl ToString) -> Self {
        TransportError::Connection {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<TransportError> for MdmError {
    fn from(e: TransportError) -> Self {
        MdmError::Transport(e.to_string())
    }
}

/// Persisted key/value store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store is full or was written by an incompatible version; erase and
    /// reopen.
    #[error("store needs erase: {0}")]
    NeedsErase(String),

    /// Underlying medium failed
    #[error("store I/O failed: {0}")]
    Io(String),

    /// Contents could not be decoded
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    /// Commit was rejected; nothing was written
    #[error("commit rejected: {0}")]
    CommitRejected(String),
}

impl StoreError {
    /// Whether erasing the store is the expected recovery.
    pub fn needs_erase(&self) -> bool {
        matches!(self, StoreError::NeedsErase(_) | StoreError::Corrupt(_))
    }
}

impl From<StoreError> for MdmError {
    fn from(e: StoreError) -> Self {
        MdmError::Storage(e.to_string())
    }
}
