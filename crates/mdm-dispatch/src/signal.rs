//! Level-triggered wakeup.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A flag that one side raises and another waits on.
///
/// Raising an already raised signal is a no-op; a successful wait lowers it.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// New lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake one waiter.
    pub fn notify(&self) {
        *self.raised.lock() = true;
        self.cond.notify_one();
    }

    /// Wait up to `timeout` for the signal. Returns whether it was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        if !*raised {
            let _timed_out = self.cond.wait_for(&mut raised, timeout);
        }
        std::mem::replace(&mut *raised, false)
    }

    /// Whether the signal is currently raised.
    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }
}
