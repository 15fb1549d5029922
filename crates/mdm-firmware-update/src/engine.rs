//! Streaming firmware installer
//!
//! An attempt walks `Idle -> Downloading -> HeaderParsed` and ends in
//! `UpToDate`, `Committed` or `Aborted`. The body is written to the target
//! partition chunk by chunk as it arrives; nothing is buffered beyond one
//! chunk. Every exit path drops the stream and aborts an open write unless
//! the image was committed.

use std::sync::Arc;
use std::time::Duration;

use mdm_platform::{BodyStream, HttpClient, HttpRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{FirmwareUpdateError, PartitionError};
use crate::image::{FirmwareHeader, MIN_HEADER_LEN};
use crate::partition::{Partition, PartitionKind, PartitionTable, PartitionWriter};

/// Default read size for the firmware stream.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Progress of the current or most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// No attempt started
    #[default]
    Idle,
    /// Stream open, waiting for the header chunk
    Downloading,
    /// Version extracted from the header
    HeaderParsed,
    /// Candidate matches the running image
    UpToDate,
    /// Writing to the target partition
    Writing,
    /// Image written and validated
    Committed,
    /// Attempt failed or was refused; nothing committed
    Aborted,
}

impl EngineState {
    /// Whether an attempt is in flight.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            EngineState::Downloading | EngineState::HeaderParsed | EngineState::Writing
        )
    }
}

/// One install attempt.
#[derive(Debug, Clone)]
pub struct FirmwareRequest {
    /// Firmware endpoint
    pub endpoint: String,
    /// Full `Authorization` header value, if the endpoint needs one
    pub authorization: Option<String>,
    /// Partition to write
    pub target: Partition,
    /// Partition whose version the candidate is compared with
    pub running: Partition,
    /// Stop after reading the header
    pub check_only: bool,
    /// Skip the version and last-invalid checks
    pub force: bool,
}

impl FirmwareRequest {
    /// Install from `endpoint` into `target`, comparing against `running`.
    pub fn new(endpoint: impl Into<String>, target: Partition, running: Partition) -> Self {
        Self {
            endpoint: endpoint.into(),
            authorization: None,
            target,
            running,
            check_only: false,
            force: false,
        }
    }

    /// Attach an `Authorization` header value.
    pub fn authorization(mut self, value: Option<String>) -> Self {
        self.authorization = value;
        self
    }

    /// Only probe for a newer version.
    pub fn check_only(mut self, check_only: bool) -> Self {
        self.check_only = check_only;
        self
    }

    /// Install regardless of version checks.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// What an attempt that did not fail produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallOutcome {
    /// Image written and committed
    Installed {
        /// Version from the image header
        version: String,
        /// Bytes written
        bytes: u64,
        /// Hex SHA-256 of the written image
        sha256: String,
    },
    /// Candidate has the running version
    UpToDate {
        /// Shared version
        version: String,
    },
    /// Probe found a different version; nothing written
    UpdateAvailable {
        /// Candidate version
        version: String,
    },
    /// Candidate matches the image that last failed to boot
    RefusedInvalid {
        /// Refused version
        version: String,
    },
}

impl InstallOutcome {
    /// Whether the attempt installed or found new firmware.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            InstallOutcome::Installed { .. } | InstallOutcome::UpdateAvailable { .. }
        )
    }

    /// Candidate version.
    pub fn version(&self) -> &str {
        match self {
            InstallOutcome::Installed { version, .. }
            | InstallOutcome::UpToDate { version }
            | InstallOutcome::UpdateAvailable { version }
            | InstallOutcome::RefusedInvalid { version } => version,
        }
    }
}

/// Restores a partition subtype when dropped.
struct KindOverride<'a> {
    table: &'a dyn PartitionTable,
    label: String,
    original: PartitionKind,
}

impl<'a> KindOverride<'a> {
    fn apply(
        table: &'a dyn PartitionTable,
        partition: &Partition,
        kind: PartitionKind,
    ) -> Result<Self, PartitionError> {
        table.set_kind(&partition.label, kind)?;
        Ok(Self {
            table,
            label: partition.label.clone(),
            original: partition.kind,
        })
    }
}

impl Drop for KindOverride<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.table.set_kind(&self.label, self.original) {
            warn!(label = %self.label, error = %e, "failed to restore partition subtype");
        }
    }
}

/// Open write that is aborted unless committed.
struct ActiveWrite {
    writer: Option<Box<dyn PartitionWriter>>,
    hasher: Sha256,
    written: u64,
}

impl ActiveWrite {
    fn new(writer: Box<dyn PartitionWriter>) -> Self {
        Self {
            writer: Some(writer),
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PartitionError::Io("write handle already closed".into()))?;
        writer.write(data)?;
        self.hasher.update(data);
        self.written = self.written.saturating_add(data.len() as u64);
        Ok(())
    }

    fn commit(mut self) -> Result<(u64, String), PartitionError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| PartitionError::Io("write handle already closed".into()))?;
        writer.finish()?;
        let digest = std::mem::take(&mut self.hasher).finalize();
        Ok((self.written, hex::encode(digest)))
    }
}

impl Drop for ActiveWrite {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            debug!(written = self.written, "aborting partition write");
            writer.abort();
        }
    }
}

/// Downloads firmware and writes it to a partition.
pub struct OtaUpdateEngine {
    http: Arc<dyn HttpClient>,
    partitions: Arc<dyn PartitionTable>,
    chunk_size: usize,
    timeout: Duration,
    state: EngineState,
}

impl OtaUpdateEngine {
    /// Create an engine. `chunk_size` is raised to the header length if smaller.
    pub fn new(
        http: Arc<dyn HttpClient>,
        partitions: Arc<dyn PartitionTable>,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            partitions,
            chunk_size: chunk_size.max(MIN_HEADER_LEN),
            timeout,
            state: EngineState::Idle,
        }
    }

    /// State reached by the most recent attempt.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Partition table the engine writes to.
    pub fn partitions(&self) -> &Arc<dyn PartitionTable> {
        &self.partitions
    }

    /// Run one attempt.
    ///
    /// # Errors
    ///
    /// Transport failures, a short or malformed header, partition failures
    /// and a body that closes early. Any open write is aborted first.
    pub fn install(&mut self, request: &FirmwareRequest) -> Result<InstallOutcome, FirmwareUpdateError> {
        info!(url = %request.endpoint, target = %request.target.label, "getting firmware");
        self.state = EngineState::Downloading;
        let result = self.run(request);
        self.state = match &result {
            Ok(InstallOutcome::Installed { .. }) => EngineState::Committed,
            Ok(InstallOutcome::UpToDate { .. }) => EngineState::UpToDate,
            Ok(InstallOutcome::UpdateAvailable { .. }) => EngineState::HeaderParsed,
            Ok(InstallOutcome::RefusedInvalid { .. }) | Err(_) => EngineState::Aborted,
        };
        if let Err(e) = &result {
            warn!(url = %request.endpoint, error = %e, "firmware install failed");
        }
        result
    }

    fn run(&mut self, request: &FirmwareRequest) -> Result<InstallOutcome, FirmwareUpdateError> {
        let mut http_request = HttpRequest::get(&request.endpoint).timeout(self.timeout);
        if let Some(auth) = &request.authorization {
            http_request = http_request.authorization(auth.clone());
        }
        let mut stream = self.http.open_stream(&http_request)?;
        let mut buffer = vec![0u8; self.chunk_size];

        let first = read_chunk(stream.as_mut(), &mut buffer)?;
        if first.len() < MIN_HEADER_LEN {
            return Err(FirmwareUpdateError::HeaderTooShort {
                received: first.len(),
                required: MIN_HEADER_LEN,
            });
        }
        let header = FirmwareHeader::decode(first)?;
        let version = header.version().to_string();
        self.state = EngineState::HeaderParsed;

        match self.running_version(&request.running) {
            Some(current) if !request.force => {
                info!(new = %version, current = %current, "new firmware version");
                if current == version {
                    info!(version = %version, "firmware already up to date");
                    return Ok(InstallOutcome::UpToDate { version });
                }
            }
            _ => info!(new = %version, "new firmware version"),
        }

        if request.check_only {
            return Ok(InstallOutcome::UpdateAvailable { version });
        }

        if let Some(invalid) = self.partitions.last_invalid() {
            let invalid_version = self
                .partitions
                .app_description(&invalid)?
                .map(|d| d.version);
            if let Some(invalid_version) = invalid_version {
                info!(version = %invalid_version, "last invalid firmware version");
                if invalid_version == version && !request.force {
                    warn!(version = %version, "refusing to update to invalid firmware version");
                    return Ok(InstallOutcome::RefusedInvalid { version });
                }
            }
        }

        let mut write = ActiveWrite::new(self.begin_write(&request.target)?);
        self.state = EngineState::Writing;
        info!(version = %version, "downloading new firmware");

        let first_len = first.len();
        write.write(buffer.get(..first_len).unwrap_or_default())?;
        loop {
            let chunk = read_chunk(stream.as_mut(), &mut buffer)?;
            if chunk.is_empty() {
                break;
            }
            write.write(chunk)?;
            debug!(read = chunk.len(), total = write.written, "written");
        }

        if !stream.is_complete() {
            return Err(FirmwareUpdateError::IncompleteBody {
                received: write.written,
            });
        }

        let (bytes, sha256) = write.commit()?;
        info!(version = %version, bytes, sha256 = %sha256, "firmware committed");
        Ok(InstallOutcome::Installed {
            version,
            bytes,
            sha256,
        })
    }

    fn running_version(&self, running: &Partition) -> Option<String> {
        match self.partitions.app_description(running) {
            Ok(descriptor) => descriptor.map(|d| d.version),
            Err(e) => {
                debug!(label = %running.label, error = %e, "no description for running partition");
                None
            }
        }
    }

    fn begin_write(&self, target: &Partition) -> Result<Box<dyn PartitionWriter>, PartitionError> {
        let current = self
            .partitions
            .find(&target.label)
            .ok_or_else(|| PartitionError::NotFound(target.label.clone()))?;
        if current.kind != PartitionKind::Factory {
            return self.partitions.begin_write(&current);
        }
        let _restore = KindOverride::apply(self.partitions.as_ref(), &current, PartitionKind::Ota(0))?;
        let opened = Partition {
            kind: PartitionKind::Ota(0),
            ..current
        };
        self.partitions.begin_write(&opened)
    }
}

fn read_chunk<'b>(stream: &mut dyn BodyStream, buffer: &'b mut [u8]) -> Result<&'b [u8], FirmwareUpdateError> {
    let read = stream.read_chunk(buffer)?;
    Ok(buffer.get(..read).unwrap_or_default())
}
