//! Boot sequences against scripted collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mdm_config::RuntimeSettings;
use mdm_firmware_update::MemoryPartitionTable;
use mdm_lifecycle::prelude::*;
use mdm_platform::{LinkEvent, LoopbackBackend, ManualClock, MemoryStore};
use mdm_test_helpers::prelude::*;
use parking_lot::Mutex;

const DEVICE_ID: &str = "a1b2c3";
const CLIENT_ID: &str = "dev-client";
const TOKEN_URL: &str = "https://auth.example.test/token";
const CONFIG_URL: &str = "https://mdm.example.test/api/iot/config";
const FIRMWARE_URL: &str = "https://mdm.example.test/api/iot/firmware";
const PROVISIONING_URL: &str = "https://mdm.example.test/api/iot/provisioning";
const LOG_URL: &str = "https://logs.example.test/ingest";
const TOKEN: &str = r#"{"access_token":"tok-1","expires_in":3600}"#;
const CONFIG: &str = r#"{"deviceName":"Hallway","deviceEntityId":"sensor.hallway"}"#;
const CONFIG_OTA: &str = r#"{"deviceName":"Hallway","deviceEntityId":"sensor.hallway","enableOTA":true}"#;
const PARTITION_SIZE: u64 = 64 * 1024;

fn provisioning() -> Vec<(&'static str, &'static str)> {
    vec![
        ("device_key", "key-1"),
        ("client_id", CLIENT_ID),
        ("client_secret", "s3cret"),
        ("token_url", TOKEN_URL),
        ("base_url", "https://mdm.example.test"),
        ("mqtt_url", "mqtts://broker.example.test"),
        ("wifi_ssid", "plant-floor"),
        ("wifi_password", "hunter2"),
        ("logging_url", LOG_URL),
    ]
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        telemetry_flush_delay_ms: 0,
        telemetry_retry_ms: 10,
        shutdown_drain_timeout_ms: 200,
        shutdown_poll_interval_ms: 5,
        network_connect_attempts: 3,
        network_retry_delay_ms: 10,
        ..RuntimeSettings::default()
    }
}

struct Rig {
    http: Arc<ScriptedHttp>,
    backend: Arc<LoopbackBackend>,
    network: Arc<ScriptedNetwork>,
    device: Arc<RecordingDevice>,
    store: Arc<MemoryStore>,
    partitions: Arc<MemoryPartitionTable>,
    clock: ManualClock,
}

impl Rig {
    fn new() -> Self {
        Self::with_network(ScriptedNetwork::default())
    }

    fn with_network(network: ScriptedNetwork) -> Self {
        let http = Arc::new(ScriptedHttp::new());
        http.push(TOKEN_URL, Reply::json(TOKEN));
        http.push(LOG_URL, Reply::status(204));
        Self {
            http,
            backend: Arc::new(LoopbackBackend::new()),
            network: Arc::new(network),
            device: Arc::new(RecordingDevice::new()),
            store: Arc::new(MemoryStore::with_entries("prov", provisioning())),
            partitions: Arc::new(MemoryPartitionTable::dual_slot(PARTITION_SIZE)),
            clock: ManualClock::new(1_000),
        }
    }

    fn platform(&self) -> Platform {
        Platform {
            store: Arc::clone(&self.store) as _,
            http: Arc::clone(&self.http) as _,
            network: Arc::clone(&self.network) as _,
            backend: Arc::clone(&self.backend) as _,
            partitions: Arc::clone(&self.partitions) as _,
            device: Arc::clone(&self.device) as _,
            clock: Arc::new(self.clock.clone()),
            core_dump: None,
        }
    }

    fn runtime(&self) -> Runtime {
        Runtime::new(
            self.platform(),
            DeviceIdentity::new(DEVICE_ID, "esp32", "1.0.0"),
            settings(),
            None,
        )
    }

    fn running_firmware(&self, version: &str) -> TestResult {
        self.partitions
            .install_image("factory", &ImageBuilder::new(version).body_len(512).build())?;
        Ok(())
    }
}

fn pump(runtime: &Runtime) {
    for _ in 0..20 {
        if runtime.run_once(Duration::from_millis(5)) == 0 {
            break;
        }
    }
}

fn record_states(runtime: &Runtime) -> Arc<Mutex<Vec<LifecycleState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    runtime.events().state.subscribe(move |state| sink.lock().push(*state));
    seen
}

fn ready(rig: &Rig, config: &str) -> Result<Runtime, Box<dyn std::error::Error>> {
    rig.http.push(CONFIG_URL, Reply::json(config));
    let runtime = rig.runtime();
    runtime.boot()?;
    pump(&runtime);
    if runtime.state() != LifecycleState::Ready {
        return Err(format!("stuck in {}", runtime.state()).into());
    }
    Ok(runtime)
}

#[test]
fn boot_reaches_ready_without_ota() -> TestResult {
    let rig = Rig::new();
    rig.http.push(CONFIG_URL, Reply::json(CONFIG));
    let runtime = rig.runtime();
    let states = record_states(&runtime);

    runtime.boot()?;
    pump(&runtime);

    assert_eq!(
        *states.lock(),
        vec![
            LifecycleState::StorageReady,
            LifecycleState::NetworkConnecting,
            LifecycleState::NetworkAvailable,
            LifecycleState::ConfigLoading,
            LifecycleState::BackendConnecting,
            LifecycleState::Ready,
        ]
    );
    assert!(rig.device.restarts().is_empty());
    assert_eq!(rig.http.count(TOKEN_URL), 1);
    assert_eq!(rig.http.count(FIRMWARE_URL), 0);

    let config_request = rig.http.requests_to(CONFIG_URL);
    assert_eq!(
        config_request.first().and_then(|r| r.header_value("authorization")),
        Some("Bearer tok-1")
    );
    let loaded = must_some(runtime.device_configuration(), "configuration loaded");
    assert_eq!(loaded.device_entity_id, "sensor.hallway");
    Ok(())
}

#[test]
fn backend_session_carries_token_and_last_will() -> TestResult {
    let rig = Rig::new();
    let _runtime = ready(&rig, CONFIG)?;

    let session = rig.backend.session().ok_or("no session")?;
    assert_eq!(session.url, "mqtts://broker.example.test");
    assert_eq!(session.client_id, DEVICE_ID);
    assert_eq!(session.username.as_deref(), Some("tok-1"));
    assert_eq!(session.password.as_deref(), Some("x"));
    let will = session.last_will.ok_or("no last will")?;
    assert_eq!(will.topic, "devices/a1b2c3/state");
    assert_eq!(will.payload, br#"{"online":false}"#);
    assert!(will.retain);

    let state = rig.backend.retained("devices/a1b2c3/state").ok_or("no state")?;
    assert_eq!(state.payload, br#"{"online":true}"#);
    let description: serde_json::Value = serde_json::from_slice(
        &rig.backend
            .retained("devices/a1b2c3/configuration")
            .ok_or("no configuration")?
            .payload,
    )?;
    assert_eq!(description["unique_id"], "devices_a1b2c3");
    assert_eq!(description["device"]["name"], "Hallway");

    let subscriptions = rig.backend.subscriptions();
    assert!(subscriptions.contains(&"devices/a1b2c3/set/#".to_string()));
    assert!(subscriptions.contains(&"iotsupport/updates/config".to_string()));
    assert!(subscriptions.contains(&"iotsupport/updates/provisioning".to_string()));
    assert!(!subscriptions.contains(&"iotsupport/updates/firmware".to_string()));
    Ok(())
}

#[test]
fn missing_entity_id_stops_in_config_loading_and_restarts() -> TestResult {
    let rig = Rig::new();
    rig.http.push(CONFIG_URL, Reply::json(r#"{"deviceName":"Hallway"}"#));
    let runtime = rig.runtime();

    runtime.boot()?;
    pump(&runtime);

    assert_eq!(runtime.state(), LifecycleState::ConfigLoading);
    let restarts = rig.device.restarts();
    assert_eq!(restarts.len(), 1);
    assert!(restarts.first().is_some_and(|r| r.contains("deviceEntityId")));
    assert!(rig.backend.session().is_none());
    Ok(())
}

#[test]
fn missing_setting_fails_boot_with_restart() -> TestResult {
    let rig = Rig {
        store: Arc::new(MemoryStore::with_entries("prov", [("device_key", "key-1")])),
        ..Rig::new()
    };
    let runtime = rig.runtime();

    let err = runtime.boot().err().ok_or("boot should fail")?;
    assert!(matches!(err, LifecycleError::Config(_)));
    assert_eq!(runtime.state(), LifecycleState::StorageReady);
    assert_eq!(rig.device.restarts().len(), 1);
    assert_eq!(rig.network.attempts(), 0);
    Ok(())
}

#[test]
fn association_retries_until_the_link_comes_up() -> TestResult {
    let rig = Rig::with_network(ScriptedNetwork::failing(2));
    rig.http.push(CONFIG_URL, Reply::json(CONFIG));
    let runtime = rig.runtime();

    runtime.boot()?;
    for _ in 0..4 {
        rig.clock.advance(10);
        pump(&runtime);
    }

    assert_eq!(rig.network.attempts(), 3);
    assert_eq!(runtime.state(), LifecycleState::Ready);
    assert!(rig.device.restarts().is_empty());
    Ok(())
}

#[test]
fn association_budget_exhaustion_restarts() -> TestResult {
    let rig = Rig::with_network(ScriptedNetwork::failing(10));
    let runtime = rig.runtime();

    runtime.boot()?;
    for _ in 0..5 {
        rig.clock.advance(10);
        pump(&runtime);
    }

    assert_eq!(rig.network.attempts(), 3);
    assert_eq!(runtime.state(), LifecycleState::NetworkConnecting);
    let reason = runtime.restart_reason().ok_or("no restart")?;
    assert!(reason.contains("after 3 attempts"), "{reason}");
    assert_eq!(rig.device.restarts(), vec![reason]);
    Ok(())
}

#[test]
fn link_loss_after_ready_reassociates() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;
    let connectivity = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&connectivity);
    runtime.events().connectivity.subscribe(move |up| sink.lock().push(*up));

    rig.network.emit(LinkEvent::Down);
    pump(&runtime);

    assert_eq!(*connectivity.lock(), vec![false, true]);
    assert_eq!(rig.network.attempts(), 2);
    assert_eq!(runtime.state(), LifecycleState::Ready);
    assert_eq!(rig.http.count(CONFIG_URL), 1);
    assert!(rig.device.restarts().is_empty());
    Ok(())
}

#[test]
fn backend_loss_publishes_last_will_and_restarts() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;

    rig.backend.drop_connection();
    pump(&runtime);

    let state = rig.backend.retained("devices/a1b2c3/state").ok_or("no state")?;
    assert_eq!(state.payload, br#"{"online":false}"#);
    assert_eq!(rig.device.restarts(), vec!["backend connection lost".to_string()]);
    Ok(())
}

#[test]
fn update_notification_for_this_device_restarts() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;

    assert!(rig.backend.inject("iotsupport/updates/config", r#"{"client_id":"someone-else"}"#));
    assert!(rig.backend.inject("iotsupport/updates/config", "garbage"));
    pump(&runtime);
    assert!(rig.device.restarts().is_empty());

    assert!(rig.backend.inject("iotsupport/updates/config", r#"{"client_id":"dev-client"}"#));
    pump(&runtime);
    assert_eq!(rig.device.restarts(), vec!["remote update requested".to_string()]);
    Ok(())
}

#[test]
fn firmware_notifications_need_ota() -> TestResult {
    let rig = Rig::new();
    let _runtime = ready(&rig, CONFIG)?;

    assert!(!rig.backend.inject("iotsupport/updates/firmware", r#"{"client_id":"dev-client"}"#));
    Ok(())
}

#[test]
fn provisioning_notification_replaces_settings_and_restarts() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;
    rig.http.push(
        PROVISIONING_URL,
        Reply::json(
            r#"{"client_id":"dev-client","client_secret":"rotated","token_url":"https://auth.example.test/token",
                "base_url":"https://mdm.example.test","mqtt_url":"mqtts://broker.example.test",
                "wifi_ssid":"office","wifi_password":"pw","logging_url":"https://logs.example.test/ingest",
                "device_key":"key-2"}"#,
        ),
    );

    assert!(rig.backend.inject("iotsupport/updates/provisioning", r#"{"client_id":"dev-client"}"#));
    pump(&runtime);

    assert_eq!(rig.device.restarts(), vec!["provisioning applied".to_string()]);
    let stored = rig.store.snapshot("prov");
    assert_eq!(stored.get("wifi_ssid").map(String::as_str), Some("office"));
    assert_eq!(stored.get("client_secret").map(String::as_str), Some("rotated"));
    assert_eq!(stored.len(), 9);
    Ok(())
}

#[test]
fn rejected_provisioning_leaves_store_untouched_and_restarts() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;
    let before: BTreeMap<String, String> = rig.store.snapshot("prov");
    rig.http
        .push(PROVISIONING_URL, Reply::json(r#"{"wifi_ssid":"office","retries":3}"#));

    assert!(rig.backend.inject("iotsupport/updates/provisioning", r#"{"client_id":"dev-client"}"#));
    pump(&runtime);

    assert_eq!(rig.store.snapshot("prov"), before);
    let restarts = rig.device.restarts();
    assert_eq!(restarts.len(), 1);
    assert!(restarts.first().is_some_and(|r| r.starts_with("provisioning failed")));
    Ok(())
}

#[test]
fn commands_reach_subscribers_on_the_dispatch_thread() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let dispatch_thread = std::thread::current().id();
    runtime.events().commands.subscribe(move |command| {
        sink.lock()
            .push((command.clone(), std::thread::current().id() == dispatch_thread));
    });

    let backend = Arc::clone(&rig.backend);
    let delivered = std::thread::spawn(move || backend.inject("devices/a1b2c3/set/relay", "on"))
        .join()
        .map_err(|_panic| "injector panicked")?;
    assert!(delivered);
    pump(&runtime);

    let received = received.lock();
    let (command, on_dispatch) = received.first().ok_or("no command")?;
    assert_eq!(command.object_id, "relay");
    assert_eq!(command.payload, b"on");
    assert!(*on_dispatch);
    assert!(rig.device.restarts().is_empty());
    Ok(())
}

#[test]
fn ota_check_runs_before_backend_when_enabled() -> TestResult {
    let rig = Rig::new();
    rig.running_firmware("1.0.0")?;
    rig.http
        .push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.0.0").body_len(512).build()));
    let runtime = rig.runtime();
    let states = record_states(&runtime);
    rig.http.push(CONFIG_URL, Reply::json(CONFIG_OTA));

    runtime.boot()?;
    pump(&runtime);

    assert!(states.lock().contains(&LifecycleState::OtaCheck));
    assert_eq!(runtime.state(), LifecycleState::Ready);
    assert_eq!(rig.http.count(FIRMWARE_URL), 1);
    assert_eq!(rig.partitions.writes_started(), 0);
    assert!(
        rig.backend
            .subscriptions()
            .contains(&"iotsupport/updates/firmware".to_string())
    );
    Ok(())
}

#[test]
fn new_firmware_at_boot_restarts_before_backend() -> TestResult {
    let rig = Rig::new();
    rig.running_firmware("1.0.0")?;
    rig.http
        .push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.1.0").body_len(512).build()));
    rig.http.push(CONFIG_URL, Reply::json(CONFIG_OTA));
    let runtime = rig.runtime();

    runtime.boot()?;
    pump(&runtime);

    assert_eq!(runtime.state(), LifecycleState::OtaCheck);
    assert_eq!(rig.device.restarts(), vec!["firmware update installed".to_string()]);
    assert_eq!(rig.partitions.boot_label(), "ota_0");
    assert!(rig.backend.session().is_none());
    Ok(())
}

#[test]
fn failed_update_at_boot_restarts_before_backend() -> TestResult {
    let rig = Rig::new();
    rig.running_firmware("1.0.0")?;
    rig.http.push(FIRMWARE_URL, Reply::timeout(FIRMWARE_URL));
    rig.http.push(CONFIG_URL, Reply::json(CONFIG_OTA));
    let runtime = rig.runtime();

    runtime.boot()?;
    pump(&runtime);

    assert_eq!(runtime.state(), LifecycleState::OtaCheck);
    assert_eq!(rig.http.count(FIRMWARE_URL), 1);
    let reason = runtime.restart_reason().ok_or("no restart")?;
    assert_eq!(rig.device.restarts(), vec![reason]);
    assert_eq!(rig.partitions.boot_label(), "factory");
    assert!(rig.backend.session().is_none());
    Ok(())
}

#[test]
fn failed_periodic_update_check_is_retried() -> TestResult {
    let rig = Rig::new();
    rig.running_firmware("1.0.0")?;
    rig.http
        .push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.0.0").body_len(512).build()));
    rig.http.push(FIRMWARE_URL, Reply::timeout(FIRMWARE_URL));
    let runtime = ready(&rig, CONFIG_OTA)?;

    rig.clock.advance(settings().update_check_initial_delay_ms);
    pump(&runtime);
    assert_eq!(rig.http.count(FIRMWARE_URL), 2);
    assert_eq!(runtime.state(), LifecycleState::Ready);
    assert!(rig.device.restarts().is_empty());

    rig.clock.advance(settings().update_check_interval_ms);
    pump(&runtime);
    assert_eq!(rig.http.count(FIRMWARE_URL), 3);
    assert!(rig.device.restarts().is_empty());
    Ok(())
}

#[test]
fn periodic_update_check_installs_and_restarts() -> TestResult {
    let rig = Rig::new();
    rig.running_firmware("1.0.0")?;
    rig.http
        .push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.0.0").body_len(512).build()));
    rig.http
        .push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.1.0").body_len(512).build()));
    let runtime = ready(&rig, CONFIG_OTA)?;
    assert_eq!(rig.http.count(FIRMWARE_URL), 1);

    rig.clock.advance(settings().update_check_initial_delay_ms);
    pump(&runtime);

    assert_eq!(rig.http.count(FIRMWARE_URL), 2);
    assert_eq!(rig.device.restarts(), vec!["firmware update installed".to_string()]);
    assert_eq!(rig.partitions.boot_label(), "ota_0");
    Ok(())
}

#[test]
fn shutdown_hooks_run_once_before_restart() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;
    let device = Arc::clone(&rig.device);
    let seen_restarts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen_restarts);
    runtime.on_shutdown(move || sink.lock().push(device.restarts().len()));

    rig.backend.drop_connection();
    rig.network.emit(LinkEvent::Down);
    pump(&runtime);

    // hook saw no restart yet and ran exactly once
    assert_eq!(*seen_restarts.lock(), vec![0]);
    assert_eq!(rig.device.restarts().len(), 1);
    Ok(())
}

#[test]
fn publish_state_merges_online_flag() -> TestResult {
    let rig = Rig::new();
    let runtime = ready(&rig, CONFIG)?;

    let mut extra = serde_json::Map::new();
    extra.insert("relay".into(), serde_json::Value::Bool(true));
    runtime.publish_state(extra)?;

    let state = rig.backend.retained("devices/a1b2c3/state").ok_or("no state")?;
    let parsed: serde_json::Value = serde_json::from_slice(&state.payload)?;
    assert_eq!(parsed, serde_json::json!({"online": true, "relay": true}));
    Ok(())
}

#[test]
fn backend_connect_survives_a_full_task_queue() -> TestResult {
    let rig = Rig::new();
    rig.http.push(CONFIG_URL, Reply::json(CONFIG));
    let runtime = rig.runtime();
    let queue = Arc::clone(runtime.queue());
    let filled = Arc::new(Mutex::new(0usize));
    let count = Arc::clone(&filled);
    runtime.events().state.subscribe(move |state| {
        if *state == LifecycleState::BackendConnecting {
            while queue.enqueue(|| {}, false).is_ok() {
                *count.lock() += 1;
            }
        }
    });

    runtime.boot()?;
    pump(&runtime);

    assert!(*filled.lock() > 0);
    assert_eq!(runtime.state(), LifecycleState::Ready);
    assert!(rig.device.restarts().is_empty());
    Ok(())
}
