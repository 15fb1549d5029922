//! Network association interface.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::error::TransportError;

/// Connectivity change reported by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// An address was obtained
    Up,
    /// Association was lost
    Down,
}

/// Handler invoked from the link's own execution context.
pub type LinkHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Radio/network link.
pub trait NetworkLink: Send + Sync {
    /// Install the connectivity handler. Replaces any previous handler.
    fn set_event_handler(&self, handler: LinkHandler);

    /// Run one association attempt. Blocks until the attempt resolves.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the attempt fails.
    fn associate(&self, ssid: &str, password: &str) -> Result<(), TransportError>;
}

/// Host link: the host's own networking is assumed to be up.
#[derive(Default)]
pub struct HostNetwork {
    handler: Mutex<Option<LinkHandler>>,
}

impl HostNetwork {
    /// New link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to the installed handler.
    pub fn notify(&self, event: LinkEvent) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl NetworkLink for HostNetwork {
    fn set_event_handler(&self, handler: LinkHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn associate(&self, ssid: &str, _password: &str) -> Result<(), TransportError> {
        info!(ssid, "using host network");
        self.notify(LinkEvent::Up);
        Ok(())
    }
}
