//! GGUF model files
//!
//! Header validation done before handing a file to llama.cpp, so a wrong or
//! truncated file fails with a readable error instead of inside the backend.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=3;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    #[error("Invalid GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Fixed-size header at the start of every GGUF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

impl GgufHeader {
    fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ModelError> {
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(word)
        };

        let magic = u32_at(0);
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let version = u32_at(4);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            tensor_count: u64_at(8),
            metadata_kv_count: u64_at(16),
        })
    }
}

/// Reads and checks the GGUF header of `path`.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];

    match file.read_exact(&mut header) {
        Ok(()) => GgufHeader::parse(&header),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ModelError::FileTooSmall),
        Err(e) => Err(ModelError::FileOpen(e)),
    }
}

/// True if `path` has a `.gguf` extension (any case).
pub fn has_gguf_extension<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gguf"))
        .unwrap_or(false)
}
