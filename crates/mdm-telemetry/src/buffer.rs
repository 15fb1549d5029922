//! Bounded capture ring.

use std::collections::VecDeque;

use crate::record::LogMessage;

/// Default number of messages kept while nothing can be uploaded.
pub const DEFAULT_CAPACITY: usize = 100;

/// FIFO of captured messages; the oldest entry is evicted once full.
#[derive(Debug, Clone)]
pub struct LogRing {
    capacity: usize,
    messages: VecDeque<LogMessage>,
    evicted: u64,
}

impl LogRing {
    /// Ring holding at most `capacity` messages (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
            evicted: 0,
        }
    }

    /// Append, evicting the oldest message when full.
    pub fn push(&mut self, message: LogMessage) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
            self.evicted = self.evicted.saturating_add(1);
        }
        self.messages.push_back(message);
    }

    /// Remove and return everything, oldest first.
    pub fn take_all(&mut self) -> Vec<LogMessage> {
        self.messages.drain(..).collect()
    }

    /// Maximum length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current length.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages dropped to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogMessage> {
        self.messages.iter()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
