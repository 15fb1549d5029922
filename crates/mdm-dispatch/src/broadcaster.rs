//! Append-only multi-subscriber notification list.
//!
//! Subscribers are stored in a singly linked list whose `next` links are
//! write-once cells. Subscribing walks to the tail and claims the first empty
//! link; losing a race to another subscriber just means continuing from the
//! node that won. Publishing only reads links that are already set, so it
//! never waits on a subscriber and can run from any context.
//!
//! There is no unsubscribe. A subscriber added concurrently with a publish may
//! miss that publish, but sees every later one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::DispatchError;
use crate::task_queue::TaskQueue;

type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Node<T> {
    handler: Handler<T>,
    next: OnceLock<Box<Node<T>>>,
}

/// Synchronous fan-out to every registered handler, in registration order.
pub struct EventBroadcaster<T> {
    head: OnceLock<Box<Node<T>>>,
    len: AtomicUsize,
}

impl<T> EventBroadcaster<T> {
    /// Empty broadcaster.
    pub fn new() -> Self {
        Self {
            head: OnceLock::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Register a handler. Safe from any thread.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        let mut node = Box::new(Node {
            handler: Box::new(handler),
            next: OnceLock::new(),
        });
        let mut link = &self.head;
        loop {
            match link.get() {
                Some(existing) => link = &existing.next,
                None => match link.set(node) {
                    Ok(()) => break,
                    Err(lost) => node = lost,
                },
            }
        }
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every visible handler with `value` on the calling thread.
    pub fn publish(&self, value: &T) {
        let mut link = &self.head;
        while let Some(node) = link.get() {
            (node.handler)(value);
            link = &node.next;
        }
    }
}

impl<T: Send + Sync + 'static> EventBroadcaster<T> {
    /// Marshal the fan-out onto `queue` so handlers run on the dispatch
    /// thread.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Full`] when the queue has no room and `blocking` is
    /// false (or the caller is the dispatch thread itself).
    pub fn publish_via(self: &Arc<Self>, queue: &TaskQueue, value: T, blocking: bool) -> Result<(), DispatchError> {
        let this = Arc::clone(self);
        queue.enqueue(move || this.publish(&value), blocking)
    }
}

impl<T> Default for EventBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for EventBroadcaster<T> {
    fn drop(&mut self) {
        // Unlink iteratively; recursive drop of a long chain could overflow.
        let mut next = self.head.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

impl<T> std::fmt::Debug for EventBroadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster").field("len", &self.len()).finish()
    }
}
