//! Error types for firmware update operations

use mdm_errors::MdmError;
use mdm_platform::TransportError;

use crate::image::ImageError;

/// Errors raised by partition storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// No partition with this label
    #[error("partition '{0}' not found")]
    NotFound(String),

    /// Partition cannot be opened for an update
    #[error("partition '{0}' is not an update partition")]
    NotUpdatable(String),

    /// Image larger than the partition
    #[error("image exceeds partition '{label}' ({size} bytes)")]
    TooLarge {
        /// Partition label
        label: String,
        /// Partition size
        size: u64,
    },

    /// Written data is not a valid image
    #[error("image in partition '{label}' failed validation: {reason}")]
    Validation {
        /// Partition label
        label: String,
        /// Reason
        reason: String,
    },

    /// Partition cannot be selected for boot
    #[error("partition '{0}' is not bootable")]
    NotBootable(String),

    /// Storage medium failed
    #[error("partition I/O failed: {0}")]
    Io(String),
}

/// Errors that can occur during firmware update operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirmwareUpdateError {
    /// Download failed
    #[error("firmware download failed: {0}")]
    Transport(#[from] TransportError),

    /// First chunk too small to hold the image headers
    #[error("received {received} bytes; need {required} to parse the firmware header")]
    HeaderTooShort {
        /// Bytes in the first chunk
        received: usize,
        /// Minimum header length
        required: usize,
    },

    /// Headers did not decode
    #[error("invalid firmware image: {0}")]
    InvalidImage(#[from] ImageError),

    /// Partition operation failed
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Stream ended before the whole body arrived
    #[error("stream closed after {received} bytes before the body was complete")]
    IncompleteBody {
        /// Bytes received before the close
        received: u64,
    },

    /// Partition layout has no slot to update
    #[error("no update partition available")]
    NoUpdatePartition,
}

impl From<FirmwareUpdateError> for MdmError {
    fn from(e: FirmwareUpdateError) -> Self {
        match e {
            FirmwareUpdateError::Transport(t) => t.into(),
            FirmwareUpdateError::IncompleteBody { .. } => MdmError::Transport(e.to_string()),
            FirmwareUpdateError::HeaderTooShort { .. } | FirmwareUpdateError::InvalidImage(_) => {
                MdmError::MalformedResponse(e.to_string())
            }
            FirmwareUpdateError::Partition(_) | FirmwareUpdateError::NoUpdatePartition => {
                MdmError::Firmware(e.to_string())
            }
        }
    }
}
