//! Firmware image fixtures.
//!
//! Produces images with the on-flash layout the update engine parses: a
//! 24-byte image header, an 8-byte segment header and a 256-byte application
//! descriptor, followed by filler body bytes.

/// Builder for synthetic firmware images.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    version: String,
    project: String,
    secure_version: u32,
    body_len: usize,
}

impl ImageBuilder {
    /// Image carrying `version`.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            project: "mdm-device".to_string(),
            secure_version: 0,
            body_len: 4096,
        }
    }

    /// Project name.
    pub fn project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    /// Secure version counter.
    pub fn secure_version(mut self, secure_version: u32) -> Self {
        self.secure_version = secure_version;
        self
    }

    /// Filler bytes after the descriptor.
    pub fn body_len(mut self, body_len: usize) -> Self {
        self.body_len = body_len;
        self
    }

    /// Encode the image.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(288 + self.body_len);
        // image header
        out.push(0xE9);
        out.push(1);
        out.extend_from_slice(&[0u8; 22]);
        // segment header: load address, length
        out.extend_from_slice(&0x3F40_0020u32.to_le_bytes());
        out.extend_from_slice(&256u32.to_le_bytes());
        // application descriptor
        out.extend_from_slice(&0xABCD_5432u32.to_le_bytes());
        out.extend_from_slice(&self.secure_version.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
        push_fixed(&mut out, &self.version, 32);
        push_fixed(&mut out, &self.project, 32);
        push_fixed(&mut out, "12:00:00", 16);
        push_fixed(&mut out, "Jan  1 2026", 16);
        push_fixed(&mut out, "v5.2", 32);
        out.extend_from_slice(&[0xAB; 32]);
        out.extend_from_slice(&[0u8; 80]);
        out.extend((0..self.body_len).map(|i| (i % 251) as u8));
        out
    }
}

fn push_fixed(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width - 1);
    out.extend_from_slice(&bytes[..len]);
    out.extend(std::iter::repeat_n(0u8, width - len));
}
