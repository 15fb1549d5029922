//! Messaging backend interface.
//!
//! Topic filters follow the usual broker conventions: `+` matches exactly one
//! level and a trailing `#` matches any number of remaining levels.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;

/// Message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Topic
    pub topic: String,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Whether the broker keeps it for late subscribers
    pub retain: bool,
}

impl OutboundMessage {
    /// Build a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Broker URL
    pub url: String,
    /// Client identifier presented to the broker
    pub client_id: String,
    /// User name; the runtime presents its access token here
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Published by the broker when the session drops uncleanly
    pub last_will: Option<OutboundMessage>,
}

/// Event delivered from the backend's execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Session established
    Connected,
    /// Session lost
    Disconnected,
    /// Message on a subscribed topic
    Message {
        /// Topic
        topic: String,
        /// Payload bytes
        payload: Vec<u8>,
    },
}

/// Handler invoked from the backend's own execution context.
pub type BackendHandler = Arc<dyn Fn(BackendEvent) + Send + Sync>;

/// Publish/subscribe session with the backend broker.
pub trait BackendLink: Send + Sync {
    /// Start a session. [`BackendEvent::Connected`] is delivered to `handler`
    /// once the broker accepts it.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the session cannot be started.
    fn connect(&self, options: &SessionOptions, handler: BackendHandler) -> Result<(), TransportError>;

    /// Subscribe to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] without a session.
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] without a session.
    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// End the session cleanly. The last will is not published.
    fn disconnect(&self);
}

/// Whether `topic` matches the subscription `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    options: Option<SessionOptions>,
    handler: Option<BackendHandler>,
    subscriptions: Vec<String>,
    published: Vec<OutboundMessage>,
    retained: Vec<OutboundMessage>,
}

/// In-process broker.
///
/// Records everything the runtime publishes and lets the embedding code
/// inject inbound messages and connection loss.
#[derive(Default)]
pub struct LoopbackBackend {
    state: Mutex<LoopbackState>,
}

impl LoopbackBackend {
    /// New broker without a session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().published.clone()
    }

    /// Last retained message per topic.
    pub fn retained(&self, topic: &str) -> Option<OutboundMessage> {
        self.state
            .lock()
            .retained
            .iter()
            .rev()
            .find(|m| m.topic == topic)
            .cloned()
    }

    /// Active subscription filters.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Options of the current session.
    pub fn session(&self) -> Option<SessionOptions> {
        self.state.lock().options.clone()
    }

    /// Deliver an inbound message if a subscription matches. Returns whether
    /// it was delivered.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let handler = {
            let state = self.state.lock();
            let subscribed = state.subscriptions.iter().any(|f| topic_matches(f, topic));
            match (&state.handler, subscribed) {
                (Some(h), true) => Some(Arc::clone(h)),
                _ => None,
            }
        };
        match handler {
            Some(handler) => {
                handler(BackendEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Drop the session uncleanly: the last will is published and
    /// [`BackendEvent::Disconnected`] is delivered.
    pub fn drop_connection(&self) {
        let handler = {
            let mut state = self.state.lock();
            if let Some(will) = state.options.as_ref().and_then(|o| o.last_will.clone()) {
                if will.retain {
                    state.retained.push(will.clone());
                }
                state.published.push(will);
            }
            state.subscriptions.clear();
            state.handler.take()
        };
        if let Some(handler) = handler {
            handler(BackendEvent::Disconnected);
        }
    }
}

impl BackendLink for LoopbackBackend {
    fn connect(&self, options: &SessionOptions, handler: BackendHandler) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            state.options = Some(options.clone());
            state.handler = Some(Arc::clone(&handler));
            state.subscriptions.clear();
        }
        debug!(client_id = %options.client_id, url = %options.url, "loopback session started");
        handler(BackendEvent::Connected);
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.handler.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.handler.is_none() {
            return Err(TransportError::NotConnected);
        }
        if message.retain {
            state.retained.push(message.clone());
        }
        state.published.push(message);
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.handler = None;
        state.subscriptions.clear();
    }
}
