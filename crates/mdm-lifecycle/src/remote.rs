//! Broadcast update notifications.

use serde::Deserialize;
use tracing::debug;

use crate::topics::UpdateKind;

#[derive(Debug, Deserialize)]
struct Notification {
    client_id: String,
}

/// Action requested by a broadcast notification addressed to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    /// Restart so the next boot reloads configuration and checks firmware
    Restart,
    /// Fetch and apply provisioning, then restart
    Reprovision,
}

/// Decide what a notification on `topic` asks of the device identified by
/// `client_id`. Foreign, unparseable and unknown notifications yield `None`.
pub fn classify(topic: &str, payload: &[u8], client_id: &str) -> Option<RemoteAction> {
    let kind = UpdateKind::from_topic(topic)?;
    let notification: Notification = match serde_json::from_slice(payload) {
        Ok(n) => n,
        Err(e) => {
            debug!(topic, error = %e, "ignoring unparseable notification");
            return None;
        }
    };
    if notification.client_id != client_id {
        debug!(topic, client_id = %notification.client_id, "notification for another device");
        return None;
    }
    Some(match kind {
        UpdateKind::Config | UpdateKind::Firmware => RemoteAction::Restart,
        UpdateKind::Provisioning => RemoteAction::Reprovision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_client() {
        let payload = br#"{"client_id":"dev-1"}"#;
        assert_eq!(
            classify("iotsupport/updates/firmware", payload, "dev-1"),
            Some(RemoteAction::Restart)
        );
        assert_eq!(
            classify("iotsupport/updates/config", payload, "dev-1"),
            Some(RemoteAction::Restart)
        );
        assert_eq!(
            classify("iotsupport/updates/provisioning", payload, "dev-1"),
            Some(RemoteAction::Reprovision)
        );
    }

    #[test]
    fn test_ignored_notifications() {
        assert_eq!(classify("iotsupport/updates/firmware", br#"{"client_id":"dev-2"}"#, "dev-1"), None);
        assert_eq!(classify("iotsupport/updates/firmware", b"not json", "dev-1"), None);
        assert_eq!(classify("iotsupport/updates/firmware", br#"{"id":"dev-1"}"#, "dev-1"), None);
        assert_eq!(classify("iotsupport/other", br#"{"client_id":"dev-1"}"#, "dev-1"), None);
    }
}
