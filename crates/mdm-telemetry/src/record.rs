//! Captured log lines and their upload encoding.

use serde::Serialize;

/// A captured diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Formatted text
    pub text: String,
    /// Clock reading at capture, in milliseconds
    pub captured_at_ms: u64,
}

impl LogMessage {
    /// Capture `text` at `captured_at_ms`.
    pub fn new(text: impl Into<String>, captured_at_ms: u64) -> Self {
        Self {
            text: text.into(),
            captured_at_ms,
        }
    }
}

#[derive(Serialize)]
struct UploadLine<'a> {
    message: &'a str,
    relative_time: u64,
    entity_id: &'a str,
}

/// Encode `messages` as newline-delimited JSON. `relative_time` is the age
/// of each message at `now_ms`.
///
/// # Errors
///
/// Serialization failure.
pub fn encode_batch(messages: &[LogMessage], entity_id: &str, now_ms: u64) -> Result<String, serde_json::Error> {
    let mut payload = String::new();
    for message in messages {
        let line = UploadLine {
            message: &message.text,
            relative_time: now_ms.saturating_sub(message.captured_at_ms),
            entity_id,
        };
        payload.push_str(&serde_json::to_string(&line)?);
        payload.push('\n');
    }
    Ok(payload)
}
