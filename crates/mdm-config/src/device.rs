//! Per-device configuration document.

use mdm_errors::ValidationError;
use serde_json::Value;

/// Configuration fetched from the backend after the network comes up.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfiguration {
    /// Display name
    pub device_name: String,
    /// Entity identifier; telemetry stays idle until it is known
    pub device_entity_id: String,
    /// Whether firmware updates are checked and installed
    pub enable_ota: bool,
    /// Full document, handed to the application on load
    pub document: Value,
}

impl DeviceConfiguration {
    /// Validate the backend document.
    ///
    /// `deviceName` and `deviceEntityId` must be strings. `enableOTA` is
    /// optional but must be a boolean when present; it defaults to `false`.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] naming the first missing or mistyped field.
    pub fn from_json(document: Value) -> Result<Self, ValidationError> {
        let device_name = required_string(&document, "deviceName")?;
        let device_entity_id = required_string(&document, "deviceEntityId")?;
        let enable_ota = match document.get("enableOTA") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(ValidationError::wrong_type("enableOTA", "bool")),
        };
        Ok(Self {
            device_name,
            device_entity_id,
            enable_ota,
            document,
        })
    }
}

fn required_string(document: &Value, field: &str) -> Result<String, ValidationError> {
    match document.get(field) {
        None | Some(Value::Null) => Err(ValidationError::Required(field.to_string())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::wrong_type(field, "string")),
    }
}
