//! Boot sequence and restart policy.
//!
//! The orchestrator owns every piece of boot state: the credential cache,
//! the configuration store, the update planner and the telemetry worker. It
//! is only ever touched from the dispatch thread. Link and backend callbacks
//! arrive on their own contexts and are turned into [`Input`]s queued on the
//! [`TaskQueue`]; the queued task locks the orchestrator and feeds it the
//! input.
//!
//! Any failure along the way ends in [`DeviceControl::restart`] after the
//! shutdown hooks have run. There is no degraded mode.
//!
//! [`DeviceControl::restart`]: mdm_platform::DeviceControl::restart

use std::sync::{Arc, Weak};
use std::time::Duration;

use mdm_config::{
    ConfigurationStore, ConnectionSettings, DeviceConfiguration, RuntimeSettings, fetch_device_configuration,
    fetch_provisioning,
};
use mdm_credentials::{CredentialManager, CredentialSettings};
use mdm_dispatch::{EventBroadcaster, TaskQueue};
use mdm_errors::{ErrorContext, MdmError, ResultExt};
use mdm_firmware_update::{OtaUpdateEngine, UpdatePlanner};
use mdm_platform::{BackendEvent, BackendHandler, LinkEvent, OutboundMessage, SessionOptions};
use mdm_telemetry::{
    CaptureContext, CaptureGuard, CoreDumpOutcome, CoreDumpUploader, TelemetryUploader, UploaderSettings,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::platform::{DeviceIdentity, Platform};
use crate::remote::{RemoteAction, classify};
use crate::state::{LifecycleEvent, LifecycleState};
use crate::topics::{LAST_WILL_PAYLOAD, Topics, UpdateKind, configuration_payload, online_state};

/// Password presented alongside the access token; the broker only checks the token.
const BACKEND_PASSWORD: &str = "x";

/// Command received on `<prefix>/<device-id>/set/<object-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Addressed object
    pub object_id: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// Notifications the runtime publishes to the application.
///
/// Handlers run on the dispatch thread while the runtime is busy with the
/// event, so they must not call back into [`Runtime`](crate::Runtime).
#[derive(Debug, Default)]
pub struct LifecycleEvents {
    /// Every state the lifecycle enters
    pub state: Arc<EventBroadcaster<LifecycleState>>,
    /// Link up (`true`) and down (`false`)
    pub connectivity: Arc<EventBroadcaster<bool>>,
    /// Commands addressed to this device
    pub commands: Arc<EventBroadcaster<Command>>,
    /// Device configuration, once per boot
    pub configuration: Arc<EventBroadcaster<DeviceConfiguration>>,
}

/// Hook run before a restart.
pub type ShutdownHook = Box<dyn FnMut() + Send>;

#[derive(Debug)]
enum Input {
    Link(LinkEvent),
    Backend(BackendEvent),
    RetryAssociate,
    UpdateCheckDue,
}

impl Input {
    /// Operation named in the log when handling this input fails.
    fn operation(&self) -> &'static str {
        match self {
            Input::Link(LinkEvent::Up) => "network bring-up",
            Input::Link(LinkEvent::Down) | Input::RetryAssociate => "network association",
            Input::Backend(BackendEvent::Connected) => "backend session setup",
            Input::Backend(BackendEvent::Disconnected) => "backend session",
            Input::Backend(BackendEvent::Message { .. }) => "remote notification",
            Input::UpdateCheckDue => "periodic update check",
        }
    }
}

/// Marshals inputs onto the dispatch thread.
#[derive(Clone)]
struct Dispatcher {
    queue: Arc<TaskQueue>,
    target: Weak<Mutex<LifecycleOrchestrator>>,
}

impl Dispatcher {
    /// Inputs are never dropped: on the dispatch thread a full queue parks
    /// the input behind the tasks already queued.
    fn send(&self, input: Input) {
        let target = Weak::clone(&self.target);
        if self.queue.enqueue_or_defer(move || deliver(&target, input), true) {
            warn!(capacity = self.queue.capacity(), "task queue full; lifecycle input deferred");
        }
    }

    fn send_after(&self, input: Input, delay: Duration) {
        let target = Weak::clone(&self.target);
        self.queue.enqueue_delayed(move || deliver(&target, input), delay);
    }
}

fn deliver(target: &Weak<Mutex<LifecycleOrchestrator>>, input: Input) {
    if let Some(orchestrator) = target.upgrade() {
        orchestrator.lock().handle(input);
    }
}

/// The boot, connect and ready state machine.
pub struct LifecycleOrchestrator {
    platform: Platform,
    identity: DeviceIdentity,
    settings: RuntimeSettings,
    events: Arc<LifecycleEvents>,
    dispatcher: Dispatcher,
    topics: Topics,
    store: ConfigurationStore,
    planner: UpdatePlanner,
    state: LifecycleState,
    connection: Option<ConnectionSettings>,
    credentials: Option<CredentialManager>,
    device_config: Option<DeviceConfiguration>,
    capture: Option<Arc<CaptureContext>>,
    // dropped before the uploader so capture stops first
    capture_guard: Option<CaptureGuard>,
    telemetry: Option<TelemetryUploader>,
    hooks: Vec<ShutdownHook>,
    associate_attempts: u32,
    link_up: bool,
    restart_reason: Option<String>,
}

impl LifecycleOrchestrator {
    pub(crate) fn shared(
        platform: Platform,
        identity: DeviceIdentity,
        settings: RuntimeSettings,
        events: Arc<LifecycleEvents>,
        queue: Arc<TaskQueue>,
        capture: Option<Arc<CaptureContext>>,
    ) -> Arc<Mutex<Self>> {
        Arc::new_cyclic(|target| {
            let engine = OtaUpdateEngine::new(
                Arc::clone(&platform.http),
                Arc::clone(&platform.partitions),
                settings.firmware_chunk_size,
                settings.http_timeout(),
            );
            Mutex::new(Self {
                topics: Topics::new(&settings.topic_prefix, &identity.device_id),
                store: ConfigurationStore::new(Arc::clone(&platform.store)),
                planner: UpdatePlanner::new(engine, settings.bootstrap_firmware_url.clone()),
                dispatcher: Dispatcher {
                    queue,
                    target: Weak::clone(target),
                },
                platform,
                identity,
                settings,
                events,
                state: LifecycleState::Boot,
                connection: None,
                credentials: None,
                device_config: None,
                capture,
                capture_guard: None,
                telemetry: None,
                hooks: Vec::new(),
                associate_attempts: 0,
                link_up: false,
                restart_reason: None,
            })
        })
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Reason of the restart this boot ended with, if any.
    pub fn restart_reason(&self) -> Option<&str> {
        self.restart_reason.as_deref()
    }

    /// Configuration loaded during this boot.
    pub fn device_configuration(&self) -> Option<&DeviceConfiguration> {
        self.device_config.as_ref()
    }

    /// Topic names of this device.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Run `hook` before any restart, after the hooks already registered.
    pub fn add_shutdown_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Publish the retained state document with `"online": true` merged in.
    ///
    /// # Errors
    ///
    /// Transport failure, including publishing without a session.
    pub fn publish_state(&self, extra: Map<String, Value>) -> Result<(), LifecycleError> {
        self.platform
            .backend
            .publish(OutboundMessage::new(self.topics.state(), online_state(extra), true))?;
        Ok(())
    }

    /// Run the synchronous part of boot. A failure restarts the device and
    /// is returned as well.
    ///
    /// # Errors
    ///
    /// Store, settings, telemetry and network failures.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        let result = self.boot();
        if let Err(e) = &result {
            self.fatal("boot", e);
        }
        result
    }

    fn boot(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Boot {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                event: LifecycleEvent::StorageOpened,
            });
        }
        self.store.prepare()?;
        self.advance(LifecycleEvent::StorageOpened)?;

        let connection = self.store.load()?;
        self.credentials = Some(CredentialManager::new(
            CredentialSettings {
                timeout: self.settings.http_timeout(),
                ..CredentialSettings::new(
                    connection.token_url.clone(),
                    connection.client_id.clone(),
                    connection.client_secret.clone(),
                )
            },
            Arc::clone(&self.platform.http),
            Arc::clone(&self.platform.clock),
        ));
        self.start_telemetry(&connection.logging_url)?;
        self.connection = Some(connection);

        self.advance(LifecycleEvent::NetworkStarted)?;
        let dispatcher = self.dispatcher.clone();
        self.platform
            .network
            .set_event_handler(Arc::new(move |event: LinkEvent| dispatcher.send(Input::Link(event))));
        self.associate()
    }

    fn start_telemetry(&mut self, logging_url: &str) -> Result<(), LifecycleError> {
        let uploader = TelemetryUploader::start(
            UploaderSettings {
                capacity: self.settings.telemetry_capacity,
                batch_size: self.settings.telemetry_batch_size,
                retry_interval: self.settings.telemetry_retry(),
                flush_delay: Duration::from_millis(self.settings.telemetry_flush_delay_ms),
                timeout: self.settings.http_timeout(),
                ..UploaderSettings::new(logging_url)
            },
            Arc::clone(&self.platform.http),
            Arc::clone(&self.platform.clock),
        )?;
        let handle = uploader.handle();
        if let Some(capture) = &self.capture {
            self.capture_guard = Some(capture.attach(handle.clone()));
        }

        let connectivity = handle.clone();
        self.events
            .connectivity
            .subscribe(move |up| connectivity.set_connected(*up));

        let timeout = self.settings.shutdown_drain_timeout();
        let poll = self.settings.shutdown_poll_interval();
        self.add_shutdown_hook(move || {
            let report = handle.drain(timeout, poll);
            debug!(remaining = report.remaining, waited = ?report.waited, "log drain finished");
        });
        self.telemetry = Some(uploader);
        Ok(())
    }

    fn handle(&mut self, input: Input) {
        if self.restart_reason.is_some() {
            debug!(?input, "restart pending; input dropped");
            return;
        }
        let operation = input.operation();
        let result = match input {
            Input::Link(event) => self.on_link(event),
            Input::RetryAssociate if self.link_up => Ok(()),
            Input::RetryAssociate => self.associate(),
            Input::Backend(event) => self.on_backend(event),
            Input::UpdateCheckDue => self.on_update_check_due(),
        };
        if let Err(e) = result {
            self.fatal(operation, &e);
        }
    }

    fn advance(&mut self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let next = self.state.on(event).ok_or(LifecycleError::InvalidTransition {
            from: self.state,
            event,
        })?;
        info!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
        self.events.state.publish(&next);
        Ok(())
    }

    fn connection(&self) -> Result<&ConnectionSettings, LifecycleError> {
        self.connection.as_ref().ok_or(LifecycleError::NotBooted)
    }

    fn credentials(&mut self) -> Result<&mut CredentialManager, LifecycleError> {
        self.credentials.as_mut().ok_or(LifecycleError::NotBooted)
    }

    fn associate(&mut self) -> Result<(), LifecycleError> {
        let connection = self.connection()?;
        let ssid = connection.wifi_ssid.clone();
        let password = connection.wifi_password.clone();

        self.associate_attempts = self.associate_attempts.saturating_add(1);
        let attempt = self.associate_attempts;
        match self.platform.network.associate(&ssid, &password) {
            Ok(()) => {
                debug!(ssid = %ssid, attempt, "association started");
                Ok(())
            }
            Err(e) if attempt < self.settings.network_connect_attempts => {
                warn!(ssid = %ssid, attempt, error = %e, "association failed; retrying");
                self.dispatcher.send_after(
                    Input::RetryAssociate,
                    Duration::from_millis(self.settings.network_retry_delay_ms),
                );
                Ok(())
            }
            Err(last) => Err(LifecycleError::NetworkExhausted { attempts: attempt, last }),
        }
    }

    fn on_link(&mut self, event: LinkEvent) -> Result<(), LifecycleError> {
        match event {
            LinkEvent::Up => {
                self.link_up = true;
                self.associate_attempts = 0;
                self.events.connectivity.publish(&true);
                if self.state.has_network() {
                    info!("network restored");
                    return Ok(());
                }
                self.advance(LifecycleEvent::LinkUp)?;
                self.network_available()
            }
            LinkEvent::Down => {
                let was_up = std::mem::replace(&mut self.link_up, false);
                if was_up {
                    self.events.connectivity.publish(&false);
                }
                warn!(state = %self.state, "network lost; reassociating");
                self.associate()
            }
        }
    }

    fn network_available(&mut self) -> Result<(), LifecycleError> {
        let endpoints = self.connection()?.endpoints();
        let authorization = self.credentials()?.authorization()?;
        self.upload_core_dump(&authorization);

        self.advance(LifecycleEvent::ConfigRequested)?;
        let config = fetch_device_configuration(
            self.platform.http.as_ref(),
            &endpoints.config,
            &authorization,
            self.settings.http_timeout(),
        )?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.handle().set_entity_id(&config.device_entity_id);
        }
        self.events.configuration.publish(&config);
        let ota = config.enable_ota;
        self.device_config = Some(config);
        self.advance(LifecycleEvent::ConfigLoaded { ota })?;

        if ota {
            if self.check_for_update(&endpoints.firmware)? {
                return Ok(());
            }
            self.advance(LifecycleEvent::UpdateChecked)?;
        } else {
            info!("firmware updates disabled");
        }
        self.connect_backend()
    }

    fn upload_core_dump(&self, authorization: &str) {
        let (Some(storage), Some(connection)) = (&self.platform.core_dump, &self.connection) else {
            return;
        };
        let uploader = CoreDumpUploader::new(
            Arc::clone(&self.platform.http),
            &connection.logging_url,
            self.identity.chip.clone(),
            self.identity.firmware_version.clone(),
            self.settings.http_timeout(),
        );
        match uploader.upload(storage.as_ref(), authorization) {
            Ok(CoreDumpOutcome::NoDump) => {}
            Ok(outcome) => info!(?outcome, "core dump processed"),
            Err(e) => warn!(error = %e, "core dump upload failed"),
        }
    }

    /// Returns whether a restart was triggered.
    fn check_for_update(&mut self, endpoint: &str) -> Result<bool, LifecycleError> {
        let authorization = self.credentials()?.authorization()?;
        let installed = self.planner.check_for_update(endpoint, Some(authorization))?;
        if installed {
            self.restart("firmware update installed");
        }
        Ok(installed)
    }

    fn connect_backend(&mut self) -> Result<(), LifecycleError> {
        let token = self.credentials()?.ensure_token()?.token().to_string();
        let options = SessionOptions {
            url: self.connection()?.mqtt_url.clone(),
            client_id: self.identity.device_id.clone(),
            username: Some(token),
            password: Some(BACKEND_PASSWORD.to_string()),
            last_will: Some(OutboundMessage::new(self.topics.state(), LAST_WILL_PAYLOAD, true)),
        };
        info!(url = %options.url, client_id = %options.client_id, "connecting to backend");
        self.platform.backend.connect(&options, self.backend_handler())?;
        Ok(())
    }

    fn backend_handler(&self) -> BackendHandler {
        let dispatcher = self.dispatcher.clone();
        let topics = self.topics.clone();
        let commands = Arc::clone(&self.events.commands);
        Arc::new(move |event: BackendEvent| {
            if let BackendEvent::Message { topic, payload } = &event
                && let Some(object_id) = topics.command_object_id(topic)
            {
                let command = Command {
                    object_id: object_id.to_string(),
                    payload: payload.clone(),
                };
                if let Err(e) = commands.publish_via(&dispatcher.queue, command, true) {
                    warn!(topic, error = %e, "command dropped");
                }
                return;
            }
            dispatcher.send(Input::Backend(event));
        })
    }

    fn on_backend(&mut self, event: BackendEvent) -> Result<(), LifecycleError> {
        match event {
            BackendEvent::Connected => self.backend_connected(),
            BackendEvent::Disconnected => Err(LifecycleError::BackendLost),
            BackendEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    fn backend_connected(&mut self) -> Result<(), LifecycleError> {
        let backend = Arc::clone(&self.platform.backend);
        let ota = self.device_config.as_ref().is_some_and(|c| c.enable_ota);
        let device_name = self
            .device_config
            .as_ref()
            .map(|c| c.device_name.as_str())
            .unwrap_or_default();

        backend.subscribe(&self.topics.command_filter())?;
        for kind in UpdateKind::ALL {
            if kind == UpdateKind::Firmware && !ota {
                continue;
            }
            backend.subscribe(&kind.topic())?;
        }
        backend.publish(OutboundMessage::new(
            self.topics.configuration(),
            configuration_payload(
                &self.settings.topic_prefix,
                &self.identity.device_id,
                device_name,
                &self.identity.firmware_version,
            ),
            true,
        ))?;
        self.publish_state(Map::new())?;

        info!(reset_reason = %self.platform.device.reset_reason(), "startup complete");
        self.advance(LifecycleEvent::BackendConnected)?;

        if ota {
            self.dispatcher.send_after(
                Input::UpdateCheckDue,
                Duration::from_millis(self.settings.update_check_initial_delay_ms),
            );
        }
        Ok(())
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), LifecycleError> {
        let client_id = self.connection()?.client_id.clone();
        match classify(topic, payload, &client_id) {
            Some(RemoteAction::Restart) => {
                info!(topic, "update requested");
                self.restart("remote update requested");
                Ok(())
            }
            Some(RemoteAction::Reprovision) => self.reprovision(),
            None if UpdateKind::from_topic(topic).is_none() => {
                warn!(topic, "message on unexpected topic");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn reprovision(&mut self) -> Result<(), LifecycleError> {
        let url = self.connection()?.endpoints().provisioning;
        let authorization = self.credentials()?.authorization()?;
        let set = fetch_provisioning(
            self.platform.http.as_ref(),
            &url,
            &authorization,
            self.settings.http_timeout(),
        )
        .map_err(LifecycleError::Provisioning)?;
        self.store
            .apply_provisioning(&set)
            .map_err(LifecycleError::Provisioning)?;
        self.restart("provisioning applied");
        Ok(())
    }

    fn on_update_check_due(&mut self) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Ready {
            return Ok(());
        }
        let endpoint = self.connection()?.endpoints().firmware;
        // Once Ready, only a failure that needs a restart is fatal here; a
        // failed download is retried at the next interval.
        match self.check_for_update(&endpoint).with_context("periodic update check") {
            Ok(true) => {}
            Ok(false) => self.schedule_update_check(),
            Err(failure) if failure.requires_restart() => {
                error!(error = %failure, "fatal lifecycle error");
                self.restart(&failure.to_string());
            }
            Err(failure) => {
                warn!(endpoint = %endpoint, error = %failure, severity = %failure.severity(), "firmware update check failed");
                self.schedule_update_check();
            }
        }
        Ok(())
    }

    fn schedule_update_check(&self) {
        self.dispatcher.send_after(
            Input::UpdateCheckDue,
            Duration::from_millis(self.settings.update_check_interval_ms),
        );
    }

    fn fatal(&mut self, operation: &str, error: &LifecycleError) {
        let failure = MdmError::from(error.clone())
            .in_context(&ErrorContext::new(operation).with("state", self.state.to_string()));
        error!(category = %failure.category(), error = %failure, "fatal lifecycle error");
        self.restart(&error.to_string());
    }

    fn restart(&mut self, reason: &str) {
        if self.restart_reason.is_some() {
            return;
        }
        info!(reason, state = %self.state, "restarting");
        self.restart_reason = Some(reason.to_string());
        for hook in &mut self.hooks {
            hook();
        }
        self.platform.device.restart(reason);
    }
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("state", &self.state)
            .field("device_id", &self.identity.device_id)
            .field("restart_reason", &self.restart_reason)
            .finish_non_exhaustive()
    }
}
