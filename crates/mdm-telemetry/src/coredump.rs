//! Core dump reporting
//!
//! A crash leaves a dump in dedicated storage:
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0 | 4 | data length |
//! | 4 | 4 | format version |
//! | 8 | 4 | task count |
//! | 12 | 4 | TCB size |
//! | 16 | 4 | memory segment count |
//! | 20 | 4 | chip revision |
//! | 24 | .. | ELF payload |
//! | end - n | n | checksum: 32 bytes (SHA-256) for version `3`, else 4 (CRC32) |
//!
//! All fields are little-endian. Only the ELF payload is uploaded, and the
//! dump is erased after every attempt whatever its result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mdm_platform::{HttpClient, HttpRequest};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::TelemetryError;

/// Header length in bytes.
pub const CORE_DUMP_HEADER_LEN: usize = 24;

/// Fixed-layout dump header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreDumpHeader {
    /// Data length
    pub data_len: u32,
    /// Format version; the low byte selects the checksum kind
    pub version: u32,
    /// Number of tasks
    pub tasks_num: u32,
    /// TCB size in bytes
    pub tcb_sz: u32,
    /// Number of memory segments
    pub mem_segs_num: u32,
    /// Chip revision
    pub chip_rev: u32,
}

impl CoreDumpHeader {
    /// Decode the first 24 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::InvalidCoreDump`] when fewer than 24 bytes are given.
    pub fn decode(bytes: &[u8]) -> Result<Self, TelemetryError> {
        let field = |index: usize| -> Result<u32, TelemetryError> {
            let start = index.saturating_mul(4);
            bytes
                .get(start..start.saturating_add(4))
                .and_then(|b| <[u8; 4]>::try_from(b).ok())
                .map(u32::from_le_bytes)
                .ok_or_else(|| TelemetryError::InvalidCoreDump(format!("header truncated at offset {start}")))
        };
        Ok(Self {
            data_len: field(0)?,
            version: field(1)?,
            tasks_num: field(2)?,
            tcb_sz: field(3)?,
            mem_segs_num: field(4)?,
            chip_rev: field(5)?,
        })
    }

    /// Length of the trailing checksum.
    pub fn checksum_len(&self) -> usize {
        if self.version & 0xFF == 3 { 32 } else { 4 }
    }

    /// ELF payload of `image`, between the header and the checksum.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::InvalidCoreDump`] when the image is too short.
    pub fn elf<'a>(&self, image: &'a [u8]) -> Result<&'a [u8], TelemetryError> {
        let end = image
            .len()
            .checked_sub(self.checksum_len())
            .filter(|end| *end >= CORE_DUMP_HEADER_LEN)
            .ok_or_else(|| TelemetryError::InvalidCoreDump(format!("{} bytes is too short", image.len())))?;
        image
            .get(CORE_DUMP_HEADER_LEN..end)
            .ok_or_else(|| TelemetryError::InvalidCoreDump("payload out of range".into()))
    }
}

/// Storage holding at most one core dump.
pub trait CoreDumpStorage: Send + Sync {
    /// Raw dump image, or `None` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Storage failure.
    fn read(&self) -> Result<Option<Vec<u8>>, TelemetryError>;

    /// Remove the stored dump.
    ///
    /// # Errors
    ///
    /// Storage failure.
    fn erase(&self) -> Result<(), TelemetryError>;
}

/// In-memory dump slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoreDump {
    image: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryCoreDump {
    /// Slot holding `image`.
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            image: Arc::new(Mutex::new(Some(image))),
        }
    }

    /// Whether a dump is stored.
    pub fn is_present(&self) -> bool {
        self.image.lock().is_some()
    }
}

impl CoreDumpStorage for MemoryCoreDump {
    fn read(&self) -> Result<Option<Vec<u8>>, TelemetryError> {
        Ok(self.image.lock().clone())
    }

    fn erase(&self) -> Result<(), TelemetryError> {
        *self.image.lock() = None;
        Ok(())
    }
}

/// Dump kept in a single file; a missing file means no dump.
#[derive(Debug, Clone)]
pub struct FileCoreDump {
    path: PathBuf,
}

impl FileCoreDump {
    /// Dump stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CoreDumpStorage for FileCoreDump {
    fn read(&self) -> Result<Option<Vec<u8>>, TelemetryError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TelemetryError::Storage(e.to_string())),
        }
    }

    fn erase(&self) -> Result<(), TelemetryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TelemetryError::Storage(e.to_string())),
        }
    }
}

/// Result of an upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreDumpOutcome {
    /// Nothing stored
    NoDump,
    /// Server accepted the payload
    Uploaded {
        /// ELF bytes sent
        bytes: usize,
    },
    /// Server answered with a non-success status
    Rejected {
        /// HTTP status
        status: u16,
    },
}

/// Uploads a stored core dump once per boot.
pub struct CoreDumpUploader {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    chip: String,
    firmware_version: String,
    timeout: Duration,
}

impl CoreDumpUploader {
    /// Upload to `<logging_base>/coredump`, tagging the dump with `chip`
    /// and `firmware_version`.
    pub fn new(
        http: Arc<dyn HttpClient>,
        logging_base: &str,
        chip: impl Into<String>,
        firmware_version: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/coredump", logging_base.trim_end_matches('/')),
            chip: chip.into(),
            firmware_version: firmware_version.into(),
            timeout,
        }
    }

    /// Upload URL with query parameters.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::Endpoint`] when the base URL does not parse.
    pub fn url(&self) -> Result<String, TelemetryError> {
        let mut url = url::Url::parse(&self.endpoint).map_err(|e| TelemetryError::Endpoint {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("chip", &self.chip)
            .append_pair("firmware_version", &self.firmware_version);
        Ok(url.into())
    }

    /// Upload the stored dump, if any, then erase it.
    ///
    /// # Errors
    ///
    /// Storage failures, a malformed dump and transport failures. The dump
    /// is erased in every case once it has been read.
    pub fn upload(
        &self,
        storage: &dyn CoreDumpStorage,
        authorization: &str,
    ) -> Result<CoreDumpOutcome, TelemetryError> {
        let Some(image) = storage.read()? else {
            debug!("no core dump stored");
            return Ok(CoreDumpOutcome::NoDump);
        };
        let result = self.send(&image, authorization);
        if let Err(e) = storage.erase() {
            warn!(error = %e, "failed to erase core dump");
        }
        result
    }

    fn send(&self, image: &[u8], authorization: &str) -> Result<CoreDumpOutcome, TelemetryError> {
        let header = CoreDumpHeader::decode(image)?;
        let elf = header.elf(image)?;
        info!(bytes = elf.len(), version = header.version, "uploading core dump ELF");

        let request = HttpRequest::post(self.url()?, elf.to_vec())
            .authorization(authorization)
            .header("Content-Type", "application/octet-stream")
            .timeout(self.timeout);
        let response = self.http.execute(&request)?;
        if response.is_success() {
            info!(status = response.status, "core dump uploaded");
            Ok(CoreDumpOutcome::Uploaded { bytes: elf.len() })
        } else {
            warn!(status = response.status, "core dump upload rejected");
            Ok(CoreDumpOutcome::Rejected {
                status: response.status,
            })
        }
    }
}
