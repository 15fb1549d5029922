//! Background log uploader
//!
//! Captured lines go into a bounded ring. A worker thread wakes when there
//! is something it can send: the device entity id is known and the backend
//! is reachable. It swaps the backlog out of the ring in one step, then
//! posts it in fixed-size NDJSON batches. A failed post is retried after a
//! fixed backoff with no retry limit; a batch is only dropped from the
//! backlog once the server accepted it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use mdm_dispatch::Signal;
use mdm_platform::{Clock, HttpClient, HttpRequest};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{DEFAULT_CAPACITY, LogRing};
use crate::error::TelemetryError;
use crate::record::{LogMessage, encode_batch};

/// Messages per upload request.
pub const DEFAULT_BATCH_SIZE: usize = 10;

const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Uploader tuning.
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    /// Log endpoint
    pub endpoint: String,
    /// Ring capacity
    pub capacity: usize,
    /// Messages per request
    pub batch_size: usize,
    /// Wait between failed attempts
    pub retry_interval: Duration,
    /// Wait after a wakeup before uploading, to collect more lines
    pub flush_delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

impl UploaderSettings {
    /// Defaults for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            capacity: DEFAULT_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_interval: Duration::from_secs(1),
            flush_delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a shutdown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages still queued when the drain gave up
    pub remaining: usize,
    /// Time spent waiting
    pub waited: Duration,
}

impl DrainReport {
    /// Whether the backlog reached zero.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug)]
struct State {
    ring: LogRing,
    entity_id: Option<String>,
    in_flight: usize,
}

struct Shared {
    settings: UploaderSettings,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    wake: Signal,
    interrupt: Signal,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    stopped: AtomicBool,
}

impl Shared {
    fn take_backlog(&self) -> Option<(VecDeque<LogMessage>, String)> {
        if !self.connected.load(Ordering::Acquire) {
            return None;
        }
        let mut state = self.state.lock();
        let entity_id = state.entity_id.clone()?;
        if state.ring.is_empty() {
            return None;
        }
        let backlog: VecDeque<LogMessage> = state.ring.take_all().into();
        state.in_flight = state.in_flight.saturating_add(backlog.len());
        Some((backlog, entity_id))
    }

    fn publish_pending(&self) {
        while let Some((mut backlog, entity_id)) = self.take_backlog() {
            while !backlog.is_empty() {
                let count = self.settings.batch_size.min(backlog.len());
                let batch: Vec<LogMessage> = backlog.drain(..count).collect();
                match encode_batch(&batch, &entity_id, self.clock.now_ms()) {
                    Ok(payload) => {
                        if !self.deliver(payload) {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, dropped = count, "failed to encode log batch"),
                }
                let mut state = self.state.lock();
                state.in_flight = state.in_flight.saturating_sub(count);
            }
        }
    }

    /// Post until accepted. Returns `false` only when the worker is stopping.
    fn deliver(&self, payload: String) -> bool {
        let request = HttpRequest::post(&self.settings.endpoint, payload)
            .header("Content-Type", "application/x-ndjson")
            .timeout(self.settings.timeout);
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            match self.post(&request) {
                Ok(()) => return true,
                Err(e) => {
                    warn!(url = %self.settings.endpoint, error = %e, "failed to upload log batch; retrying");
                    self.interrupt.wait_timeout(self.settings.retry_interval);
                }
            }
        }
    }

    fn post(&self, request: &HttpRequest) -> Result<(), TelemetryError> {
        let response = self.http.execute(request)?;
        if response.is_success() {
            Ok(())
        } else {
            Err(TelemetryError::Status {
                url: request.url.clone(),
                status: response.status,
            })
        }
    }

    fn pending(&self) -> usize {
        let state = self.state.lock();
        state.ring.len().saturating_add(state.in_flight)
    }

    fn run(&self) {
        debug!("log upload worker started");
        while !self.stopped.load(Ordering::Acquire) {
            if !self.wake.wait_timeout(IDLE_WAIT) {
                continue;
            }
            if !self.settings.flush_delay.is_zero() && !self.shutting_down.load(Ordering::Acquire) {
                self.interrupt.wait_timeout(self.settings.flush_delay);
            }
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            self.publish_pending();
        }
        debug!("log upload worker stopped");
    }
}

/// Cheap handle for feeding and steering a running uploader.
#[derive(Clone)]
pub struct TelemetryHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("endpoint", &self.shared.settings.endpoint)
            .field("pending", &self.pending())
            .finish()
    }
}

impl TelemetryHandle {
    /// Append a line to the ring. Never blocks on the network.
    pub fn capture(&self, text: impl Into<String>) {
        let message = LogMessage::new(text, self.shared.clock.now_ms());
        let ready = {
            let mut state = self.shared.state.lock();
            state.ring.push(message);
            state.entity_id.is_some()
        };
        if ready {
            self.shared.wake.notify();
        }
    }

    /// Set the device entity id. An empty id keeps the uploader idle.
    pub fn set_entity_id(&self, entity_id: &str) {
        let backlog = {
            let mut state = self.shared.state.lock();
            state.entity_id = (!entity_id.is_empty()).then(|| entity_id.to_string());
            state.entity_id.is_some() && !state.ring.is_empty()
        };
        if backlog {
            self.shared.wake.notify();
        }
    }

    /// Record backend reachability; becoming reachable triggers an upload.
    pub fn set_connected(&self, connected: bool) {
        let was = self.shared.connected.swap(connected, Ordering::AcqRel);
        if connected && !was {
            self.shared.wake.notify();
        }
    }

    /// Messages not yet accepted by the server.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Force an upload and wait until the backlog is empty or `timeout`
    /// elapses, checking every `poll`. Anything left is reported, not sent.
    pub fn drain(&self, timeout: Duration, poll: Duration) -> DrainReport {
        info!("flushing log messages before restart");
        self.shared.shutting_down.store(true, Ordering::Release);
        self.shared.wake.notify();
        self.shared.interrupt.notify();

        let mut waited = Duration::ZERO;
        while self.pending() > 0 && waited < timeout {
            std::thread::sleep(poll);
            waited = waited.saturating_add(poll);
        }

        let remaining = self.pending();
        if remaining > 0 {
            warn!(remaining, "shutdown timeout; dropping remaining log messages");
        }
        DrainReport { remaining, waited }
    }
}

/// Owns the upload worker thread. Dropping it stops the worker.
pub struct TelemetryUploader {
    handle: TelemetryHandle,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryUploader {
    /// Start the worker.
    ///
    /// # Errors
    ///
    /// The worker thread could not be spawned.
    pub fn start(
        settings: UploaderSettings,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TelemetryError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ring: LogRing::new(settings.capacity),
                entity_id: None,
                in_flight: 0,
            }),
            settings: UploaderSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
            http,
            clock,
            wake: Signal::new(),
            interrupt: Signal::new(),
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("log-upload".into())
            .spawn(move || worker_shared.run())
            .map_err(|e| TelemetryError::Storage(format!("failed to start upload worker: {e}")))?;
        Ok(Self {
            handle: TelemetryHandle { shared },
            worker: Some(worker),
        })
    }

    /// Handle for capture and control.
    pub fn handle(&self) -> TelemetryHandle {
        self.handle.clone()
    }
}

impl Drop for TelemetryUploader {
    fn drop(&mut self) {
        let shared = &self.handle.shared;
        shared.stopped.store(true, Ordering::Release);
        shared.wake.notify();
        shared.interrupt.notify();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("log upload worker panicked");
            }
        }
    }
}
