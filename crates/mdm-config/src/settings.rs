//! Persisted connection settings and runtime tunables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identity and endpoints read from the persisted store at boot.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Device key
    pub device_key: String,
    /// OAuth client identifier; also matched against remote notifications
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Token endpoint
    pub token_url: String,
    /// Backend base URL, always ending in `/`
    pub base_url: String,
    /// Messaging broker URL
    pub mqtt_url: String,
    /// Network name
    pub wifi_ssid: String,
    /// Network passphrase
    pub wifi_password: String,
    /// Log upload endpoint
    pub logging_url: String,
}

impl ConnectionSettings {
    /// Backend endpoints derived from the base URL.
    pub fn endpoints(&self) -> Endpoints {
        Endpoints::from_base(&self.base_url)
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("base_url", &self.base_url)
            .field("mqtt_url", &self.mqtt_url)
            .field("wifi_ssid", &self.wifi_ssid)
            .field("logging_url", &self.logging_url)
            .finish_non_exhaustive()
    }
}

/// Append `/` unless already present.
pub fn normalize_base_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Backend REST endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Device configuration document
    pub config: String,
    /// Provisioning document
    pub provisioning: String,
    /// Firmware image
    pub firmware: String,
}

impl Endpoints {
    /// Derive endpoints from a base URL.
    pub fn from_base(base_url: &str) -> Self {
        let base = normalize_base_url(base_url);
        Self {
            config: format!("{base}api/iot/config"),
            provisioning: format!("{base}api/iot/provisioning"),
            firmware: format!("{base}api/iot/firmware"),
        }
    }
}

/// Runtime tunables. Every field has a default, so an empty JSON object is a
/// valid settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Timeout applied to every HTTP request, in milliseconds
    pub http_timeout_ms: u64,
    /// Immediate task queue capacity
    pub task_queue_capacity: usize,
    /// Telemetry ring capacity
    pub telemetry_capacity: usize,
    /// Messages per upload request
    pub telemetry_batch_size: usize,
    /// Delay before retrying a failed upload, in milliseconds
    pub telemetry_retry_ms: u64,
    /// Delay between a capture and the upload it schedules, in milliseconds
    pub telemetry_flush_delay_ms: u64,
    /// Upper bound on the shutdown drain, in milliseconds
    pub shutdown_drain_timeout_ms: u64,
    /// Drain poll interval, in milliseconds
    pub shutdown_poll_interval_ms: u64,
    /// Firmware download chunk size in bytes
    pub firmware_chunk_size: usize,
    /// Association attempts before the network is declared unreachable
    pub network_connect_attempts: u32,
    /// Delay between association attempts, in milliseconds
    pub network_retry_delay_ms: u64,
    /// Delay before the first periodic update check, in milliseconds
    pub update_check_initial_delay_ms: u64,
    /// Interval between periodic update checks, in milliseconds
    pub update_check_interval_ms: u64,
    /// Prefix of per-device backend topics
    pub topic_prefix: String,
    /// Image installed into the factory slot on single-slot devices
    pub bootstrap_firmware_url: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            http_timeout_ms: 10_000,
            task_queue_capacity: 16,
            telemetry_capacity: 100,
            telemetry_batch_size: 10,
            telemetry_retry_ms: 1_000,
            telemetry_flush_delay_ms: 1_000,
            shutdown_drain_timeout_ms: 5_000,
            shutdown_poll_interval_ms: 100,
            firmware_chunk_size: 1024,
            network_connect_attempts: 5,
            network_retry_delay_ms: 2_000,
            update_check_initial_delay_ms: 60_000,
            update_check_interval_ms: 6 * 60 * 60 * 1000,
            topic_prefix: "devices".to_string(),
            bootstrap_firmware_url: None,
        }
    }
}

impl RuntimeSettings {
    /// Load from a JSON file; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SettingsFile`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ConfigError::SettingsFile(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::SettingsFile(format!("{}: {e}", path.display())))
    }

    /// HTTP timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Upload retry backoff.
    pub fn telemetry_retry(&self) -> Duration {
        Duration::from_millis(self.telemetry_retry_ms)
    }

    /// Shutdown drain bound.
    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_timeout_ms)
    }

    /// Shutdown drain poll interval.
    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_normalize_base() {
        let with_slash = Endpoints::from_base("https://api.example.test/");
        let without = Endpoints::from_base("https://api.example.test");
        assert_eq!(with_slash, without);
        assert_eq!(without.config, "https://api.example.test/api/iot/config");
        assert_eq!(without.provisioning, "https://api.example.test/api/iot/provisioning");
        assert_eq!(without.firmware, "https://api.example.test/api/iot/firmware");
    }

    #[test]
    fn test_runtime_settings_partial_json() -> Result<(), serde_json::Error> {
        let settings: RuntimeSettings = serde_json::from_str(r#"{"telemetry_batch_size": 25}"#)?;
        assert_eq!(settings.telemetry_batch_size, 25);
        assert_eq!(settings.telemetry_capacity, 100);
        assert_eq!(settings.shutdown_drain_timeout(), Duration::from_secs(5));
        Ok(())
    }
}
