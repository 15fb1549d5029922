//! Lifecycle states and the transition table.

use serde::{Deserialize, Serialize};

/// Where the device is in its boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Nothing initialised
    #[default]
    Boot,
    /// Persistent store open
    StorageReady,
    /// Associating with the network
    NetworkConnecting,
    /// Link up
    NetworkAvailable,
    /// Fetching the device configuration
    ConfigLoading,
    /// Checking for firmware
    OtaCheck,
    /// Opening the backend session
    BackendConnecting,
    /// Fully operational
    Ready,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Boot => "Boot",
            LifecycleState::StorageReady => "StorageReady",
            LifecycleState::NetworkConnecting => "NetworkConnecting",
            LifecycleState::NetworkAvailable => "NetworkAvailable",
            LifecycleState::ConfigLoading => "ConfigLoading",
            LifecycleState::OtaCheck => "OTACheck",
            LifecycleState::BackendConnecting => "BackendConnecting",
            LifecycleState::Ready => "Ready",
        };
        f.write_str(name)
    }
}

/// Something that moves the lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Persistent store opened
    StorageOpened,
    /// Network association started
    NetworkStarted,
    /// Link reported up
    LinkUp,
    /// Configuration fetch started
    ConfigRequested,
    /// Configuration accepted
    ConfigLoaded {
        /// Whether firmware updates are enabled
        ota: bool,
    },
    /// Firmware check finished without installing anything
    UpdateChecked,
    /// Backend session established
    BackendConnected,
}

impl LifecycleState {
    /// State after `event`, or `None` when `event` is not valid here.
    pub fn on(self, event: LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent as E;
        use LifecycleState as S;
        match (self, event) {
            (S::Boot, E::StorageOpened) => Some(S::StorageReady),
            (S::StorageReady, E::NetworkStarted) => Some(S::NetworkConnecting),
            (S::NetworkConnecting, E::LinkUp) => Some(S::NetworkAvailable),
            (S::NetworkAvailable, E::ConfigRequested) => Some(S::ConfigLoading),
            (S::ConfigLoading, E::ConfigLoaded { ota: true }) => Some(S::OtaCheck),
            (S::ConfigLoading, E::ConfigLoaded { ota: false }) | (S::OtaCheck, E::UpdateChecked) => {
                Some(S::BackendConnecting)
            }
            (S::BackendConnecting, E::BackendConnected) => Some(S::Ready),
            _ => None,
        }
    }

    /// Whether the network link has been up during this boot.
    pub fn has_network(self) -> bool {
        !matches!(
            self,
            LifecycleState::Boot | LifecycleState::StorageReady | LifecycleState::NetworkConnecting
        )
    }
}
