//! Bounded FIFO of deferred closures with a delayed-task list.
//!
//! Producers on any thread call [`TaskQueue::enqueue`] or
//! [`TaskQueue::enqueue_delayed`]. A single consumer, the dispatch thread,
//! calls [`TaskQueue::process`] which promotes due delayed tasks and then
//! drains the FIFO to empty.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use mdm_platform::Clock;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::DispatchError;

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default immediate queue capacity.
pub const DEFAULT_CAPACITY: usize = 16;

/// Deferred task queue.
pub struct TaskQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    capacity: usize,
    // keyed by (deadline, insertion sequence)
    delayed: Mutex<BTreeMap<(u64, u64), Task>>,
    sequence: AtomicU64,
    consumer: Mutex<Option<ThreadId>>,
    clock: Arc<dyn Clock>,
}

impl TaskQueue {
    /// Queue with room for `capacity` immediate tasks.
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            delayed: Mutex::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            consumer: Mutex::new(None),
            clock,
        }
    }

    /// Immediate queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting in the immediate queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the immediate queue is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Tasks waiting for their deadline.
    pub fn delayed_len(&self) -> usize {
        self.delayed.lock().len()
    }

    /// Append a task to the immediate queue.
    ///
    /// With `blocking`, a full queue suspends the caller until the consumer
    /// frees a slot. The dispatch thread itself never waits on its own
    /// queue; a blocking enqueue from it behaves as non-blocking.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Full`] when the queue is full and the caller did not
    /// (or could not) wait.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static, blocking: bool) -> Result<(), DispatchError> {
        self.push(Box::new(task), blocking).map_err(|(error, _task)| error)
    }

    /// Like [`enqueue`](Self::enqueue), but a task refused by a full queue is
    /// parked on the delayed list, due now, instead of being dropped. It runs
    /// on the next [`process`](Self::process) pass after the tasks already
    /// queued. Returns `true` when the task was parked.
    pub fn enqueue_or_defer(&self, task: impl FnOnce() + Send + 'static, blocking: bool) -> bool {
        match self.push(Box::new(task), blocking) {
            Ok(()) => false,
            Err((error, task)) => {
                debug!(error = %error, "task parked until the queue drains");
                self.schedule(task, 0);
                true
            }
        }
    }

    fn push(&self, task: Task, blocking: bool) -> Result<(), (DispatchError, Task)> {
        let full = DispatchError::Full {
            capacity: self.capacity,
        };
        if blocking && !self.on_consumer_thread() {
            // The queue owns its receiver, so the channel never disconnects.
            return self.tx.send(task).map_err(|channel::SendError(task)| (full, task));
        }
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => {
                if blocking {
                    warn!(capacity = self.capacity, "blocking enqueue from dispatch thread on full queue");
                }
                Err((full, task))
            }
        }
    }

    /// Schedule a task to run no earlier than `delay` from now.
    pub fn enqueue_delayed(&self, task: impl FnOnce() + Send + 'static, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.schedule(Box::new(task), delay_ms);
    }

    fn schedule(&self, task: Task, delay_ms: u64) {
        let deadline = self.clock.now_ms().saturating_add(delay_ms);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.delayed.lock().insert((deadline, seq), task);
        trace!(deadline, "delayed task scheduled");
    }

    /// Promote due delayed tasks, then run the immediate queue to empty.
    ///
    /// Must only be called from the dispatch thread. Returns the number of
    /// tasks executed.
    pub fn process(&self) -> usize {
        self.claim_consumer();
        self.promote_due();
        let mut executed = 0usize;
        while let Ok(task) = self.rx.try_recv() {
            task();
            executed = executed.saturating_add(1);
        }
        executed
    }

    /// Wait up to `max_wait` for work, then [`process`](Self::process).
    ///
    /// The wait is cut short by an immediate task or by the earliest delayed
    /// deadline. Returns the number of tasks executed.
    pub fn run_once(&self, max_wait: Duration) -> usize {
        self.claim_consumer();
        let wait = match self.next_deadline() {
            Some(deadline) => {
                let until = deadline.saturating_sub(self.clock.now_ms());
                max_wait.min(Duration::from_millis(until))
            }
            None => max_wait,
        };
        let mut executed = 0usize;
        match self.rx.recv_timeout(wait) {
            Ok(task) => {
                task();
                executed = 1;
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
        executed.saturating_add(self.process())
    }

    fn next_deadline(&self) -> Option<u64> {
        self.delayed.lock().keys().next().map(|(deadline, _)| *deadline)
    }

    fn promote_due(&self) {
        let now = self.clock.now_ms();
        let mut delayed = self.delayed.lock();
        while let Some(entry) = delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = *entry.key();
            let task = entry.remove();
            if let Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) = self.tx.try_send(task) {
                // No room: leave it (and everything after it) for the next pass.
                delayed.insert(key, task);
                break;
            }
        }
    }

    fn claim_consumer(&self) {
        let mut consumer = self.consumer.lock();
        if consumer.is_none() {
            *consumer = Some(std::thread::current().id());
        }
    }

    fn on_consumer_thread(&self) -> bool {
        *self.consumer.lock() == Some(std::thread::current().id())
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("delayed", &self.delayed_len())
            .finish()
    }
}
