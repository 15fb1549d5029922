//! Directory-backed partition table survives a reopen.

use mdm_firmware_update::prelude::*;
use mdm_firmware_update::FilePartitionTable;
use mdm_test_helpers::prelude::*;

#[test]
fn boot_selection_and_images_persist() -> TestResult {
    let dir = tempfile::tempdir()?;
    let image = ImageBuilder::new("3.1.0").build();

    {
        let table = FilePartitionTable::open(dir.path(), MemoryPartitionTable::dual_slot(1 << 16))?;
        table.install_image("ota_0", &image)?;
        let ota0 = table.find("ota_0").ok_or("ota_0")?;
        table.set_boot(&ota0)?;
    }

    let reopened = FilePartitionTable::open(dir.path(), MemoryPartitionTable::new())?;
    assert_eq!(reopened.boot_label(), "ota_0");
    assert_eq!(reopened.image("ota_0"), Some(image));
    let ota0 = reopened.find("ota_0").ok_or("ota_0")?;
    let descriptor = reopened.app_description(&ota0)?.ok_or("descriptor")?;
    assert_eq!(descriptor.version, "3.1.0");
    Ok(())
}
