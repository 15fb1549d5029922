//! Update planning across partition layouts
//!
//! Dual-slot layouts install into the slot after the running one. The
//! single-slot layout keeps a small bootstrapper in `factory` and the
//! application in `ota`; the application cannot overwrite itself, so an
//! update check refreshes the bootstrapper, probes for a newer application
//! and, when either finds something, boots into the bootstrapper which then
//! calls [`UpdatePlanner::bootstrap`].

use tracing::{info, warn};

use crate::engine::{FirmwareRequest, InstallOutcome, OtaUpdateEngine};
use crate::error::FirmwareUpdateError;
use crate::partition::{Partition, PartitionKind};

/// Label of the application slot in single-slot layouts.
pub const SINGLE_SLOT_LABEL: &str = "ota";

/// Label of the factory partition.
pub const FACTORY_LABEL: &str = "factory";

/// Chooses target partitions and boot selection for update checks.
pub struct UpdatePlanner {
    engine: OtaUpdateEngine,
    bootstrap_endpoint: Option<String>,
}

impl UpdatePlanner {
    /// Plan updates with `engine`. `bootstrap_endpoint` serves the
    /// bootstrapper image in single-slot layouts.
    pub fn new(engine: OtaUpdateEngine, bootstrap_endpoint: Option<String>) -> Self {
        Self {
            engine,
            bootstrap_endpoint,
        }
    }

    /// Engine used for installs.
    pub fn engine(&self) -> &OtaUpdateEngine {
        &self.engine
    }

    /// Whether the layout is the single-slot one.
    pub fn is_single_slot(&self) -> bool {
        self.engine.partitions().find(SINGLE_SLOT_LABEL).is_some()
    }

    /// Look for new firmware at `endpoint`. Returns `true` when a restart
    /// is needed: something was installed or the bootstrapper must run.
    ///
    /// # Errors
    ///
    /// Install failures and a layout without a usable target.
    pub fn check_for_update(
        &mut self,
        endpoint: &str,
        authorization: Option<String>,
    ) -> Result<bool, FirmwareUpdateError> {
        if self.is_single_slot() {
            self.check_single_slot(endpoint, authorization)
        } else {
            self.check_dual_slot(endpoint, authorization)
        }
    }

    fn check_dual_slot(
        &mut self,
        endpoint: &str,
        authorization: Option<String>,
    ) -> Result<bool, FirmwareUpdateError> {
        let partitions = self.engine.partitions().clone();
        let target = partitions
            .next_update_partition()
            .ok_or(FirmwareUpdateError::NoUpdatePartition)?;
        let request =
            FirmwareRequest::new(endpoint, target.clone(), partitions.running()).authorization(authorization);

        if let InstallOutcome::Installed { version, .. } = self.engine.install(&request)? {
            info!(version = %version, target = %target.label, "app update installed");
            partitions.set_boot(&target)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn check_single_slot(
        &mut self,
        endpoint: &str,
        authorization: Option<String>,
    ) -> Result<bool, FirmwareUpdateError> {
        let partitions = self.engine.partitions().clone();
        let factory = self.factory()?;
        let app = partitions
            .find(SINGLE_SLOT_LABEL)
            .ok_or(FirmwareUpdateError::NoUpdatePartition)?;
        info!("single partition mode; checking bootstrapper firmware");

        if let Some(bootstrap) = self.bootstrap_endpoint.clone() {
            let request = FirmwareRequest::new(bootstrap, factory.clone(), factory.clone())
                .authorization(authorization.clone());
            if self.engine.install(&request)?.changed() {
                info!("bootstrapper firmware updated");
                partitions.set_boot(&factory)?;
                return Ok(true);
            }
        }

        let probe = FirmwareRequest::new(endpoint, app.clone(), app)
            .authorization(authorization)
            .check_only(true);
        if self.engine.install(&probe)?.changed() {
            info!("app update found; restarting into bootstrapper");
            partitions.set_boot(&factory)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Install the application into the single slot and select it for boot.
    /// Runs from the bootstrapper. When nothing new was installed and the
    /// slot cannot be booted, the install is repeated with `force`.
    ///
    /// # Errors
    ///
    /// The slot is missing or still not bootable after the forced install.
    pub fn bootstrap(&mut self, endpoint: &str, authorization: Option<String>) -> Result<bool, FirmwareUpdateError> {
        let partitions = self.engine.partitions().clone();
        let app = partitions
            .find(SINGLE_SLOT_LABEL)
            .ok_or(FirmwareUpdateError::NoUpdatePartition)?;
        let mut request = FirmwareRequest::new(endpoint, app.clone(), app.clone()).authorization(authorization);

        let installed = self.install_logged(&request);
        let boot = partitions.set_boot(&app);

        if !installed && boot.is_err() {
            warn!("failed to set boot partition; forcing new firmware");
            request = request.force(true);
            let forced = self.install_logged(&request);
            partitions.set_boot(&app)?;
            return Ok(forced);
        }

        boot?;
        Ok(installed)
    }

    fn install_logged(&mut self, request: &FirmwareRequest) -> bool {
        match self.engine.install(request) {
            Ok(outcome) => outcome.changed(),
            Err(e) => {
                warn!(error = %e, "bootstrap install failed");
                false
            }
        }
    }

    fn factory(&self) -> Result<Partition, FirmwareUpdateError> {
        let partitions = self.engine.partitions();
        partitions
            .find(FACTORY_LABEL)
            .or_else(|| partitions.find_kind(PartitionKind::Factory))
            .ok_or(FirmwareUpdateError::NoUpdatePartition)
    }
}
