//! Dispatch loop around one boot of the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use mdm_config::{DeviceConfiguration, RuntimeSettings};
use mdm_dispatch::TaskQueue;
use mdm_telemetry::CaptureContext;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::LifecycleError;
use crate::orchestrator::{LifecycleEvents, LifecycleOrchestrator};
use crate::platform::{DeviceIdentity, Platform};
use crate::state::LifecycleState;

/// One boot of the device: the task queue, the event broadcasters and the
/// orchestrator they drive.
///
/// The thread calling [`boot`](Self::boot) becomes the dispatch thread and
/// must also be the one calling [`run_once`](Self::run_once).
pub struct Runtime {
    queue: Arc<TaskQueue>,
    events: Arc<LifecycleEvents>,
    orchestrator: Arc<Mutex<LifecycleOrchestrator>>,
}

impl Runtime {
    /// Wire a runtime. Nothing runs until [`boot`](Self::boot).
    ///
    /// With `capture`, every log line is copied to the telemetry uploader
    /// started during boot.
    pub fn new(
        platform: Platform,
        identity: DeviceIdentity,
        settings: RuntimeSettings,
        capture: Option<Arc<CaptureContext>>,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new(settings.task_queue_capacity, Arc::clone(&platform.clock)));
        let events = Arc::new(LifecycleEvents::default());
        let orchestrator = LifecycleOrchestrator::shared(
            platform,
            identity,
            settings,
            Arc::clone(&events),
            Arc::clone(&queue),
            capture,
        );
        Self {
            queue,
            events,
            orchestrator,
        }
    }

    /// Broadcasters to subscribe to before booting.
    pub fn events(&self) -> &Arc<LifecycleEvents> {
        &self.events
    }

    /// The dispatch queue.
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Open storage, load settings and start network association. The rest
    /// of the sequence is driven by [`run_once`](Self::run_once).
    ///
    /// # Errors
    ///
    /// Failures before the network is requested. The device has already
    /// been asked to restart when this returns an error.
    pub fn boot(&self) -> Result<(), LifecycleError> {
        // claims the calling thread as the dispatch thread
        self.queue.process();
        self.orchestrator.lock().start()
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.orchestrator.lock().state()
    }

    /// Why this boot ended, once a restart was requested.
    pub fn restart_reason(&self) -> Option<String> {
        self.orchestrator.lock().restart_reason().map(str::to_string)
    }

    /// Configuration loaded during this boot.
    pub fn device_configuration(&self) -> Option<DeviceConfiguration> {
        self.orchestrator.lock().device_configuration().cloned()
    }

    /// Run `hook` before any restart.
    pub fn on_shutdown(&self, hook: impl FnMut() + Send + 'static) {
        self.orchestrator.lock().add_shutdown_hook(hook);
    }

    /// Publish application state on the retained state topic.
    ///
    /// # Errors
    ///
    /// Transport failure, including publishing before the backend session
    /// is up.
    pub fn publish_state(&self, extra: Map<String, Value>) -> Result<(), LifecycleError> {
        self.orchestrator.lock().publish_state(extra)
    }

    /// Wait up to `max_wait` for queued work and run it. Returns the number
    /// of tasks executed.
    pub fn run_once(&self, max_wait: Duration) -> usize {
        self.queue.run_once(max_wait)
    }

    /// Dispatch until a restart is requested and return its reason.
    pub fn run_until_restart(&self, poll: Duration) -> String {
        loop {
            if let Some(reason) = self.restart_reason() {
                return reason;
            }
            self.queue.run_once(poll);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("queue", &self.queue)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
