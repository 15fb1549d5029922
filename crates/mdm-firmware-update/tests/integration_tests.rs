//! Streaming installs and update planning against scripted endpoints.

use std::sync::Arc;
use std::time::Duration;

use mdm_firmware_update::prelude::*;
use mdm_platform::HttpClient;
use mdm_test_helpers::prelude::*;

const FIRMWARE_URL: &str = "https://mdm.example.test/api/iot/firmware";
const BOOTSTRAP_URL: &str = "https://mdm.example.test/api/iot/bootstrap";

fn engine(http: &Arc<ScriptedHttp>, table: &MemoryPartitionTable) -> OtaUpdateEngine {
    OtaUpdateEngine::new(
        Arc::clone(http) as Arc<dyn HttpClient>,
        Arc::new(table.clone()),
        1024,
        Duration::from_secs(5),
    )
}

/// Dual-slot table running `version` from `ota_0`.
fn running_dual(version: &str) -> Result<MemoryPartitionTable, PartitionError> {
    let table = MemoryPartitionTable::dual_slot(64 * 1024);
    table.install_image("factory", &ImageBuilder::new("factory").build())?;
    table.install_image("ota_0", &ImageBuilder::new(version).build())?;
    let ota0 = table
        .find("ota_0")
        .ok_or_else(|| PartitionError::NotFound("ota_0".into()))?;
    table.set_boot(&ota0)?;
    table.reboot();
    Ok(table)
}

fn request(table: &MemoryPartitionTable) -> Result<FirmwareRequest, PartitionError> {
    let target = table
        .next_update_partition()
        .ok_or_else(|| PartitionError::NotFound("update slot".into()))?;
    Ok(FirmwareRequest::new(FIRMWARE_URL, target, table.running()))
}

#[test]
fn same_version_is_up_to_date_and_never_written() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.2.0").build()));
    let mut engine = engine(&http, &table);

    let outcome = engine.install(&request(&table)?)?;

    assert_eq!(outcome, InstallOutcome::UpToDate { version: "1.2.0".into() });
    assert!(!outcome.changed());
    assert_eq!(engine.state(), EngineState::UpToDate);
    assert_eq!(table.writes_started(), 0);
    Ok(())
}

#[test]
fn new_version_is_written_and_committed() -> TestResult {
    let table = running_dual("1.2.0")?;
    let image = ImageBuilder::new("1.3.0").body_len(5000).build();
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(image.clone()));
    let mut engine = engine(&http, &table);

    let outcome = engine.install(&request(&table)?.authorization(Some("Bearer abc".into())))?;

    let InstallOutcome::Installed { version, bytes, sha256 } = outcome.clone() else {
        return Err(format!("unexpected outcome {outcome:?}").into());
    };
    assert_eq!(version, "1.3.0");
    assert_eq!(bytes, image.len() as u64);
    assert_eq!(sha256.len(), 64);
    assert_eq!(table.image("ota_1"), Some(image));
    assert_eq!(engine.state(), EngineState::Committed);

    let sent = http.requests_to(FIRMWARE_URL);
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent.first().and_then(|r| r.header_value("authorization")),
        Some("Bearer abc")
    );
    Ok(())
}

#[test]
fn last_invalid_version_is_refused_unless_forced() -> TestResult {
    let table = running_dual("1.2.0")?;
    table.install_image("ota_1", &ImageBuilder::new("1.3.0").build())?;
    table.mark_invalid("ota_1");
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.3.0").build()));
    let mut engine = engine(&http, &table);

    let refused = engine.install(&request(&table)?)?;
    assert_eq!(refused, InstallOutcome::RefusedInvalid { version: "1.3.0".into() });
    assert_eq!(engine.state(), EngineState::Aborted);
    assert_eq!(table.writes_started(), 0);

    let forced = engine.install(&request(&table)?.force(true))?;
    assert!(matches!(forced, InstallOutcome::Installed { .. }));
    assert_eq!(table.writes_started(), 1);
    Ok(())
}

#[test]
fn check_only_reads_the_header_without_writing() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("2.0.0").build()));
    let mut engine = engine(&http, &table);

    let outcome = engine.install(&request(&table)?.check_only(true))?;

    assert_eq!(outcome, InstallOutcome::UpdateAvailable { version: "2.0.0".into() });
    assert!(outcome.changed());
    assert_eq!(table.writes_started(), 0);
    Ok(())
}

#[test]
fn body_closed_early_aborts_without_commit() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(
        FIRMWARE_URL,
        Reply::Stream {
            body: ImageBuilder::new("1.3.0").body_len(3000).build(),
            complete: false,
            fail_at: None,
        },
    );
    let mut engine = engine(&http, &table);

    let err = engine
        .install(&request(&table)?)
        .err()
        .ok_or("early close must fail")?;

    assert!(matches!(err, FirmwareUpdateError::IncompleteBody { received } if received > 0));
    assert_eq!(engine.state(), EngineState::Aborted);
    assert_eq!(table.writes_started(), 1);
    assert_eq!(table.image("ota_1"), Some(Vec::new()));
    assert!(table.set_boot(&request(&table)?.target).is_err());
    Ok(())
}

#[test]
fn read_failure_mid_stream_aborts_the_write() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(
        FIRMWARE_URL,
        Reply::Stream {
            body: ImageBuilder::new("1.3.0").body_len(4000).build(),
            complete: true,
            fail_at: Some(2500),
        },
    );
    let mut engine = engine(&http, &table);

    let err = engine
        .install(&request(&table)?)
        .err()
        .ok_or("reset must fail")?;

    assert!(matches!(err, FirmwareUpdateError::Transport(_)));
    assert_eq!(table.image("ota_1"), Some(Vec::new()));
    Ok(())
}

#[test]
fn short_header_is_rejected() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(vec![0xE9; 100]));
    let mut engine = engine(&http, &table);

    let err = engine.install(&request(&table)?).err().ok_or("must fail")?;

    assert_eq!(
        err,
        FirmwareUpdateError::HeaderTooShort {
            received: 100,
            required: 288
        }
    );
    assert_eq!(table.writes_started(), 0);
    Ok(())
}

#[test]
fn http_error_status_is_a_transport_failure() -> TestResult {
    let table = running_dual("1.2.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::status(503));
    let mut engine = engine(&http, &table);

    let err = engine.install(&request(&table)?).err().ok_or("must fail")?;

    assert!(matches!(err, FirmwareUpdateError::Transport(_)));
    let mdm: mdm_errors::MdmError = err.into();
    assert!(mdm.is_retryable());
    Ok(())
}

#[test]
fn factory_partition_can_be_updated_and_keeps_its_kind() -> TestResult {
    let table = MemoryPartitionTable::single_slot(64 * 1024);
    table.install_image("factory", &ImageBuilder::new("boot-1").build())?;
    let factory = table.find("factory").ok_or("factory")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(BOOTSTRAP_URL, Reply::stream(ImageBuilder::new("boot-2").build()));
    let mut engine = engine(&http, &table);

    let outcome = engine.install(&FirmwareRequest::new(BOOTSTRAP_URL, factory.clone(), factory))?;

    assert!(matches!(outcome, InstallOutcome::Installed { ref version, .. } if version == "boot-2"));
    assert_eq!(
        table.find("factory").map(|p| p.kind),
        Some(PartitionKind::Factory)
    );
    Ok(())
}

#[test]
fn dual_slot_planner_installs_and_selects_boot() -> TestResult {
    let table = running_dual("1.0.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.1.0").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), None);

    assert!(!planner.is_single_slot());
    assert!(planner.check_for_update(FIRMWARE_URL, None)?);
    assert_eq!(table.boot_label(), "ota_1");

    table.reboot();
    assert!(!planner.check_for_update(FIRMWARE_URL, None)?);
    Ok(())
}

/// Single-slot table running the application from `ota`.
fn running_single(bootstrapper: &str, app: &str) -> Result<MemoryPartitionTable, PartitionError> {
    let table = MemoryPartitionTable::single_slot(64 * 1024);
    table.install_image("factory", &ImageBuilder::new(bootstrapper).build())?;
    table.install_image("ota", &ImageBuilder::new(app).build())?;
    let ota = table
        .find("ota")
        .ok_or_else(|| PartitionError::NotFound("ota".into()))?;
    table.set_boot(&ota)?;
    table.reboot();
    Ok(table)
}

#[test]
fn single_slot_planner_probes_then_boots_bootstrapper() -> TestResult {
    let table = running_single("boot-1", "1.0.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(BOOTSTRAP_URL, Reply::stream(ImageBuilder::new("boot-1").build()));
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.1.0").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), Some(BOOTSTRAP_URL.into()));

    assert!(planner.is_single_slot());
    assert!(planner.check_for_update(FIRMWARE_URL, None)?);

    assert_eq!(table.writes_started(), 0, "probe never writes");
    assert_eq!(table.boot_label(), "factory");
    assert_eq!(http.count(BOOTSTRAP_URL), 1);
    assert_eq!(http.count(FIRMWARE_URL), 1);
    Ok(())
}

#[test]
fn single_slot_planner_refreshes_bootstrapper_first() -> TestResult {
    let table = running_single("boot-1", "1.0.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(BOOTSTRAP_URL, Reply::stream(ImageBuilder::new("boot-2").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), Some(BOOTSTRAP_URL.into()));

    assert!(planner.check_for_update(FIRMWARE_URL, None)?);

    assert_eq!(table.boot_label(), "factory");
    assert_eq!(http.count(FIRMWARE_URL), 0);
    Ok(())
}

#[test]
fn single_slot_planner_idle_when_everything_is_current() -> TestResult {
    let table = running_single("boot-1", "1.0.0")?;
    let http = Arc::new(ScriptedHttp::new());
    http.push(BOOTSTRAP_URL, Reply::stream(ImageBuilder::new("boot-1").build()));
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.0.0").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), Some(BOOTSTRAP_URL.into()));

    assert!(!planner.check_for_update(FIRMWARE_URL, None)?);
    assert_eq!(table.boot_label(), "ota");
    Ok(())
}

#[test]
fn bootstrap_installs_application_into_the_slot() -> TestResult {
    let table = running_single("boot-1", "1.0.0")?;
    let factory = table.find("factory").ok_or("factory")?;
    table.set_boot(&factory)?;
    table.reboot();
    let http = Arc::new(ScriptedHttp::new());
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.1.0").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), None);

    assert!(planner.bootstrap(FIRMWARE_URL, None)?);
    assert_eq!(table.boot_label(), "ota");
    Ok(())
}

#[test]
fn bootstrap_forces_install_when_slot_is_unbootable() -> TestResult {
    let table = MemoryPartitionTable::single_slot(64 * 1024);
    table.install_image("factory", &ImageBuilder::new("boot-1").build())?;
    let http = Arc::new(ScriptedHttp::new());
    // The empty slot has no version to compare with, so the first attempt
    // fails on a truncated body and the retry succeeds.
    http.push(
        FIRMWARE_URL,
        Reply::Stream {
            body: ImageBuilder::new("1.0.0").build(),
            complete: false,
            fail_at: None,
        },
    );
    http.push(FIRMWARE_URL, Reply::stream(ImageBuilder::new("1.0.0").build()));
    let mut planner = UpdatePlanner::new(engine(&http, &table), None);

    assert!(planner.bootstrap(FIRMWARE_URL, None)?);
    assert_eq!(http.count(FIRMWARE_URL), 2);
    assert_eq!(table.boot_label(), "ota");
    Ok(())
}

#[test]
fn planner_without_update_slot_fails() -> TestResult {
    let table = MemoryPartitionTable::new().with_partition(Partition::new(
        "factory",
        PartitionKind::Factory,
        4096,
    ));
    let http = Arc::new(ScriptedHttp::new());
    let mut planner = UpdatePlanner::new(engine(&http, &table), None);

    let err = planner
        .check_for_update(FIRMWARE_URL, None)
        .err()
        .ok_or("no slot must fail")?;
    assert_eq!(err, FirmwareUpdateError::NoUpdatePartition);
    assert_eq!(http.requests().len(), 0);
    Ok(())
}
