//! Backend topic layout and payloads.
//!
//! Per-device topics live under `<prefix>/<device-id>/`:
//!
//! - `state`: retained JSON with `"online": true`; the last will sets it to
//!   `{"online":false}`
//! - `configuration`: retained device description
//! - `set/<object-id>`: commands addressed to one object
//!
//! Broadcast notifications arrive on `iotsupport/updates/<kind>`.

use serde_json::{Map, Value, json};

/// Payload the broker publishes on the state topic when the session drops.
pub const LAST_WILL_PAYLOAD: &str = r#"{"online":false}"#;

/// Kind of broadcast update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// Device configuration changed
    Config,
    /// New firmware published
    Firmware,
    /// New provisioning document
    Provisioning,
}

impl UpdateKind {
    /// Every kind.
    pub const ALL: [UpdateKind; 3] = [UpdateKind::Config, UpdateKind::Firmware, UpdateKind::Provisioning];

    /// Short name used in the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Config => "config",
            UpdateKind::Firmware => "firmware",
            UpdateKind::Provisioning => "provisioning",
        }
    }

    /// Broadcast topic.
    pub fn topic(self) -> String {
        format!("iotsupport/updates/{}", self.as_str())
    }

    /// Kind for a broadcast topic.
    pub fn from_topic(topic: &str) -> Option<UpdateKind> {
        UpdateKind::ALL.into_iter().find(|kind| kind.topic() == topic)
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic names for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    /// Topics under `<prefix>/<device_id>/`.
    pub fn new(prefix: &str, device_id: &str) -> Self {
        Self {
            base: format!("{}/{device_id}/", prefix.trim_end_matches('/')),
        }
    }

    /// `<prefix>/<device-id>/`
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Retained state topic.
    pub fn state(&self) -> String {
        format!("{}state", self.base)
    }

    /// Retained device description topic.
    pub fn configuration(&self) -> String {
        format!("{}configuration", self.base)
    }

    /// Filter covering every command topic.
    pub fn command_filter(&self) -> String {
        format!("{}set/#", self.base)
    }

    /// Command topic for `object_id`.
    pub fn command(&self, object_id: &str) -> String {
        format!("{}set/{object_id}", self.base)
    }

    /// Object id addressed by a command topic.
    pub fn command_object_id<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix("set/")
            .filter(|id| !id.is_empty())
    }
}

/// State payload: `extra` fields plus `"online": true`.
pub fn online_state(extra: Map<String, Value>) -> Vec<u8> {
    let mut state = extra;
    state.insert("online".into(), Value::Bool(true));
    Value::Object(state).to_string().into_bytes()
}

/// Device description published on connect.
pub fn configuration_payload(prefix: &str, device_id: &str, device_name: &str, firmware_version: &str) -> Vec<u8> {
    json!({
        "unique_id": format!("{prefix}_{device_id}"),
        "device": {
            "name": device_name,
            "firmware_version": firmware_version,
        },
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("devices/", "a1b2c3");
        assert_eq!(topics.state(), "devices/a1b2c3/state");
        assert_eq!(topics.configuration(), "devices/a1b2c3/configuration");
        assert_eq!(topics.command_filter(), "devices/a1b2c3/set/#");
        assert_eq!(topics.command("relay"), "devices/a1b2c3/set/relay");
    }

    #[test]
    fn test_command_object_id() {
        let topics = Topics::new("devices", "a1b2c3");
        assert_eq!(topics.command_object_id("devices/a1b2c3/set/relay"), Some("relay"));
        assert_eq!(topics.command_object_id("devices/a1b2c3/set/"), None);
        assert_eq!(topics.command_object_id("devices/a1b2c3/state"), None);
        assert_eq!(topics.command_object_id("devices/other/set/relay"), None);
    }

    #[test]
    fn test_update_topics() {
        assert_eq!(UpdateKind::Firmware.topic(), "iotsupport/updates/firmware");
        assert_eq!(
            UpdateKind::from_topic("iotsupport/updates/provisioning"),
            Some(UpdateKind::Provisioning)
        );
        assert_eq!(UpdateKind::from_topic("iotsupport/updates/other"), None);
    }

    #[test]
    fn test_online_state_payload() {
        let mut extra = Map::new();
        extra.insert("relay".into(), Value::Bool(false));
        insta::assert_snapshot!(
            String::from_utf8_lossy(&online_state(extra)),
            @r#"{"online":true,"relay":false}"#
        );
    }
}
