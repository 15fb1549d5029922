//! Lifecycle errors

use mdm_config::ConfigError;
use mdm_credentials::CredentialError;
use mdm_dispatch::DispatchError;
use mdm_errors::MdmError;
use mdm_firmware_update::FirmwareUpdateError;
use mdm_platform::TransportError;
use mdm_telemetry::TelemetryError;

use crate::state::{LifecycleEvent, LifecycleState};

/// Failures that stop the boot sequence. Every one of them ends in a restart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// Persisted settings or configuration document unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Token exchange failed
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Firmware bootstrap failed
    #[error(transparent)]
    Firmware(#[from] FirmwareUpdateError),

    /// Telemetry worker could not start
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Backend session could not be started
    #[error("backend session failed: {0}")]
    Transport(#[from] TransportError),

    /// Continuation could not be queued
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Every network association attempt failed
    #[error("network association failed after {attempts} attempts: {last}")]
    NetworkExhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure
        last: TransportError,
    },

    /// Established backend session dropped
    #[error("backend connection lost")]
    BackendLost,

    /// Provisioning requested by the backend could not be applied
    #[error("provisioning failed: {0}")]
    Provisioning(ConfigError),

    /// Event arrived in a state that does not accept it
    #[error("{event:?} is not valid in state {from}")]
    InvalidTransition {
        /// Current state
        from: LifecycleState,
        /// Rejected event
        event: LifecycleEvent,
    },

    /// Operation needs settings that are loaded during boot
    #[error("runtime has not booted")]
    NotBooted,
}

impl From<LifecycleError> for MdmError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Config(c) => c.into(),
            LifecycleError::Credential(c) => c.into(),
            LifecycleError::Firmware(f) => f.into(),
            LifecycleError::Telemetry(t) => t.into(),
            LifecycleError::Transport(t) => t.into(),
            LifecycleError::Dispatch(d) => d.into(),
            LifecycleError::NetworkExhausted { .. }
            | LifecycleError::BackendLost
            | LifecycleError::Provisioning(_)
            | LifecycleError::InvalidTransition { .. }
            | LifecycleError::NotBooted => MdmError::Lifecycle(e.to_string()),
        }
    }
}
