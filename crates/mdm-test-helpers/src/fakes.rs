//! Recording fakes for the network link and device control.

use std::sync::atomic::{AtomicUsize, Ordering};

use mdm_platform::{DeviceControl, LinkEvent, LinkHandler, NetworkLink, ResetReason, TransportError};
use parking_lot::Mutex;

/// Network link failing a fixed number of association attempts.
#[derive(Default)]
pub struct ScriptedNetwork {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    handler: Mutex<Option<LinkHandler>>,
}

impl ScriptedNetwork {
    /// Link whose first `failures` attempts fail.
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    /// Association attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Deliver a connectivity event as the radio would.
    pub fn emit(&self, event: LinkEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl NetworkLink for ScriptedNetwork {
    fn set_event_handler(&self, handler: LinkHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn associate(&self, ssid: &str, _password: &str) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::connection(ssid, "association failed"));
        }
        self.emit(LinkEvent::Up);
        Ok(())
    }
}

/// Device control recording restart requests.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    restarts: Mutex<Vec<String>>,
    reset_reason: ResetReason,
}

impl RecordingDevice {
    /// New recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder reporting `reason` as the boot cause.
    pub fn with_reset_reason(reason: ResetReason) -> Self {
        Self {
            reset_reason: reason,
            ..Self::default()
        }
    }

    /// Reasons passed to `restart`, in order.
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().clone()
    }
}

impl DeviceControl for RecordingDevice {
    fn restart(&self, reason: &str) {
        self.restarts.lock().push(reason.to_string());
    }

    fn reset_reason(&self) -> ResetReason {
        self.reset_reason
    }
}
