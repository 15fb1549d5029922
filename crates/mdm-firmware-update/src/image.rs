//! Application image header decoding.
//!
//! An image starts with a fixed 24-byte image header, the header of its first
//! segment (8 bytes) and the 256-byte application descriptor that the first
//! segment carries. All integers are little-endian and all strings are
//! NUL-terminated within their fixed-width fields.
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 24 | image header, magic `0xE9` |
//! | 24 | 8 | segment header: load address, length |
//! | 32 | 256 | application descriptor, magic `0xABCD5432` |
//! | 48 | 32 | version string (inside the descriptor) |

/// Image header length.
pub const IMAGE_HEADER_LEN: usize = 24;
/// Segment header length.
pub const SEGMENT_HEADER_LEN: usize = 8;
/// Application descriptor length.
pub const APP_DESCRIPTOR_LEN: usize = 256;
/// Bytes needed before the version can be read.
pub const MIN_HEADER_LEN: usize = IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN + APP_DESCRIPTOR_LEN;

/// Image header magic byte.
pub const IMAGE_MAGIC: u8 = 0xE9;
/// Application descriptor magic word.
pub const APP_DESCRIPTOR_MAGIC: u32 = 0xABCD_5432;

/// Header decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// Buffer ended inside a field
    #[error("truncated at offset {offset}")]
    Truncated {
        /// Offset of the field that did not fit
        offset: usize,
    },

    /// Magic value mismatch
    #[error("bad {what} magic {found:#x}")]
    BadMagic {
        /// Which header
        what: &'static str,
        /// Value found
        found: u32,
    },

    /// String field is not UTF-8
    #[error("field at offset {offset} is not UTF-8")]
    NotUtf8 {
        /// Field offset
        offset: usize,
    },
}

/// Bounds-checked little-endian reader.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ImageError::Truncated { offset: self.pos })?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(ImageError::Truncated { offset: self.pos })?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ImageError> {
        let offset = self.pos;
        self.take(N)?
            .try_into()
            .map_err(|_slice_len| ImageError::Truncated { offset })
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(u8::from_le_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn cstr(&mut self, width: usize) -> Result<String, ImageError> {
        let offset = self.pos;
        let field = self.take(width)?;
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        let text = field.get(..end).unwrap_or_default();
        std::str::from_utf8(text)
            .map(str::to_string)
            .map_err(|_utf8| ImageError::NotUtf8 { offset })
    }

    fn skip(&mut self, len: usize) -> Result<(), ImageError> {
        self.take(len).map(|_| ())
    }
}

/// Fixed image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Number of segments
    pub segment_count: u8,
    /// Flash mode
    pub spi_mode: u8,
    /// Flash speed and size nibbles
    pub spi_speed_size: u8,
    /// Entry point
    pub entry_addr: u32,
    /// Chip identifier
    pub chip_id: u16,
    /// Minimum chip revision
    pub min_chip_rev_full: u16,
    /// Maximum chip revision
    pub max_chip_rev_full: u16,
    /// Whether a SHA-256 digest is appended to the image
    pub hash_appended: bool,
}

impl ImageHeader {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ImageError> {
        let magic = c.u8()?;
        if magic != IMAGE_MAGIC {
            return Err(ImageError::BadMagic {
                what: "image",
                found: u32::from(magic),
            });
        }
        let segment_count = c.u8()?;
        let spi_mode = c.u8()?;
        let spi_speed_size = c.u8()?;
        let entry_addr = c.u32()?;
        c.skip(4)?; // write-protect pin, pin drive settings
        let chip_id = c.u16()?;
        c.skip(1)?; // legacy minimum revision
        let min_chip_rev_full = c.u16()?;
        let max_chip_rev_full = c.u16()?;
        c.skip(4)?;
        let hash_appended = c.u8()? == 1;
        Ok(Self {
            segment_count,
            spi_mode,
            spi_speed_size,
            entry_addr,
            chip_id,
            min_chip_rev_full,
            max_chip_rev_full,
            hash_appended,
        })
    }
}

/// Segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Load address
    pub load_addr: u32,
    /// Segment length
    pub data_len: u32,
}

/// Application descriptor embedded in the first segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    /// Anti-rollback counter
    pub secure_version: u32,
    /// Version string compared against the running image
    pub version: String,
    /// Project name
    pub project_name: String,
    /// Build time
    pub time: String,
    /// Build date
    pub date: String,
    /// Framework version
    pub idf_version: String,
    /// Digest of the ELF the image was built from
    pub app_elf_sha256: [u8; 32],
}

impl AppDescriptor {
    fn read(c: &mut Cursor<'_>) -> Result<Self, ImageError> {
        let magic = c.u32()?;
        if magic != APP_DESCRIPTOR_MAGIC {
            return Err(ImageError::BadMagic {
                what: "app descriptor",
                found: magic,
            });
        }
        let secure_version = c.u32()?;
        c.skip(8)?;
        let version = c.cstr(32)?;
        let project_name = c.cstr(32)?;
        let time = c.cstr(16)?;
        let date = c.cstr(16)?;
        let idf_version = c.cstr(32)?;
        let app_elf_sha256 = c.array::<32>()?;
        c.skip(80)?;
        Ok(Self {
            secure_version,
            version,
            project_name,
            time,
            date,
            idf_version,
            app_elf_sha256,
        })
    }

    /// Decode a descriptor stored on its own, as partition metadata does.
    ///
    /// # Errors
    ///
    /// [`ImageError`] when the buffer is short or the magic is wrong.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        Self::read(&mut Cursor::new(bytes))
    }
}

/// Headers at the start of an application image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareHeader {
    /// Image header
    pub image: ImageHeader,
    /// First segment header
    pub segment: SegmentHeader,
    /// Application descriptor
    pub app: AppDescriptor,
}

impl FirmwareHeader {
    /// Decode the headers from the first bytes of an image.
    ///
    /// # Errors
    ///
    /// [`ImageError`] when fewer than [`MIN_HEADER_LEN`] bytes are given or a
    /// magic value is wrong.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut c = Cursor::new(bytes);
        let image = ImageHeader::read(&mut c)?;
        let segment = SegmentHeader {
            load_addr: c.u32()?,
            data_len: c.u32()?,
        };
        let app = AppDescriptor::read(&mut c)?;
        Ok(Self { image, segment, app })
    }

    /// Version string of the image.
    pub fn version(&self) -> &str {
        &self.app.version
    }
}
