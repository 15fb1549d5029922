//! Persisted settings and provisioning replacement.

use std::collections::BTreeSet;
use std::sync::Arc;

use mdm_platform::{KeyValueStore, WriteBatch};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::provisioning::ProvisioningSet;
use crate::settings::{ConnectionSettings, normalize_base_url};

/// Namespace holding connection settings and provisioning data.
pub const PROVISIONING_NAMESPACE: &str = "prov";

/// Keys [`ConfigurationStore::load`] requires.
pub const REQUIRED_KEYS: [&str; 9] = [
    "device_key",
    "client_id",
    "client_secret",
    "token_url",
    "base_url",
    "mqtt_url",
    "wifi_ssid",
    "wifi_password",
    "logging_url",
];

/// Access to the persisted provisioning namespace.
#[derive(Clone)]
pub struct ConfigurationStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigurationStore {
    /// Wrap a key/value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Open the store, erasing and reopening it once if it reports that it is
    /// full or was written by an incompatible version.
    ///
    /// # Errors
    ///
    /// Any other open failure, or a failure of the single retry.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        match self.store.init() {
            Ok(()) => Ok(()),
            Err(e) if e.needs_erase() => {
                warn!(error = %e, "store unusable; erasing");
                self.store.erase_all()?;
                self.store.init()?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read every required setting.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingSetting`] for the first absent key; no defaults
    /// are substituted.
    pub fn load(&self) -> Result<ConnectionSettings, ConfigError> {
        let get = |key: &str| -> Result<String, ConfigError> {
            self.store
                .get(PROVISIONING_NAMESPACE, key)?
                .ok_or_else(|| ConfigError::MissingSetting(key.to_string()))
        };
        let settings = ConnectionSettings {
            device_key: get("device_key")?,
            client_id: get("client_id")?,
            client_secret: get("client_secret")?,
            token_url: get("token_url")?,
            base_url: normalize_base_url(&get("base_url")?),
            mqtt_url: get("mqtt_url")?,
            wifi_ssid: get("wifi_ssid")?,
            wifi_password: get("wifi_password")?,
            logging_url: get("logging_url")?,
        };
        info!(client_id = %settings.client_id, base_url = %settings.base_url, "connection settings loaded");
        Ok(settings)
    }

    /// Replace the persisted namespace with `set`.
    ///
    /// Keys absent from `set` are deleted and every key in `set` is written,
    /// all in one commit.
    ///
    /// # Errors
    ///
    /// Store failures; the namespace is unchanged when the commit fails.
    pub fn apply_provisioning(&self, set: &ProvisioningSet) -> Result<(), ConfigError> {
        let existing: BTreeSet<String> = self.store.keys(PROVISIONING_NAMESPACE)?.into_iter().collect();
        let mut batch = WriteBatch::new();
        let mut removed = 0usize;
        for stale in existing.iter().filter(|k| !set.contains(k)) {
            batch.delete(stale.as_str());
            removed = removed.saturating_add(1);
        }
        for (key, value) in set.iter() {
            batch.set(key, value);
        }
        self.store.commit(PROVISIONING_NAMESPACE, &batch)?;
        info!(written = set.len(), removed, "provisioning applied");
        Ok(())
    }

    /// Validate a raw document and apply it. Nothing is written or deleted
    /// when any value is not a string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a non-string value, otherwise as
    /// [`apply_provisioning`](Self::apply_provisioning).
    pub fn apply_provisioning_json(&self, document: &Value) -> Result<(), ConfigError> {
        let set = ProvisioningSet::from_json(document)?;
        self.apply_provisioning(&set)
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore").finish_non_exhaustive()
    }
}
