//! Authenticated fetches of backend documents.

use std::time::Duration;

use mdm_platform::{HttpClient, HttpRequest};
use serde_json::Value;
use tracing::info;

use crate::device::DeviceConfiguration;
use crate::error::ConfigError;
use crate::provisioning::ProvisioningSet;

fn fetch_json(http: &dyn HttpClient, url: &str, authorization: &str, timeout: Duration) -> Result<Value, ConfigError> {
    let request = HttpRequest::get(url).authorization(authorization).timeout(timeout);
    let response = http.execute(&request)?;
    if !response.is_success() {
        return Err(ConfigError::Status {
            url: url.to_string(),
            status: response.status,
        });
    }
    response.json().map_err(|e| ConfigError::InvalidResponse {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch and validate the device configuration document.
///
/// # Errors
///
/// Transport and status failures, a non-JSON body, or a document failing
/// [`DeviceConfiguration::from_json`].
pub fn fetch_device_configuration(
    http: &dyn HttpClient,
    url: &str,
    authorization: &str,
    timeout: Duration,
) -> Result<DeviceConfiguration, ConfigError> {
    info!(url, "getting device configuration");
    let config = DeviceConfiguration::from_json(fetch_json(http, url, authorization, timeout)?)?;
    info!(
        device_name = %config.device_name,
        device_entity_id = %config.device_entity_id,
        enable_ota = config.enable_ota,
        "device configuration loaded"
    );
    Ok(config)
}

/// Fetch and validate a provisioning document.
///
/// # Errors
///
/// Transport and status failures, a non-JSON body, or a non-string value.
pub fn fetch_provisioning(
    http: &dyn HttpClient,
    url: &str,
    authorization: &str,
    timeout: Duration,
) -> Result<ProvisioningSet, ConfigError> {
    info!(url, "getting provisioning data");
    Ok(ProvisioningSet::from_json(&fetch_json(http, url, authorization, timeout)?)?)
}
