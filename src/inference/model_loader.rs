//! Model file pre-flight.
//!
//! Reads the fixed GGUF header so a missing, truncated or foreign file is
//! rejected with a precise reason before the engine tries to map it.
//!
//! Header layout (little-endian): magic `GGUF` (4), version u32,
//! tensor count u64, metadata KV count u64.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
pub const GGUF_HEADER_LEN: usize = 24;
/// Oldest header version llama.cpp still reads.
pub const MIN_GGUF_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum ModelFileError {
    #[error("Model file not found: {0}")]
    NotFound(String),

    #[error("Model path is not a regular file: {0}")]
    NotAFile(String),

    #[error("Invalid GGUF format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// What the header says about a model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFileInfo {
    /// GGUF format version.
    pub version: u32,

    /// Number of tensors in the file.
    pub tensor_count: u64,

    /// Number of metadata key/value pairs.
    pub metadata_kv_count: u64,

    /// File size in bytes.
    pub file_size: u64,
}

impl ModelFileInfo {
    /// Encode as a bare header (useful for fixtures).
    pub fn header_bytes(&self) -> [u8; GGUF_HEADER_LEN] {
        let mut out = [0u8; GGUF_HEADER_LEN];
        out[0..4].copy_from_slice(&GGUF_MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..16].copy_from_slice(&self.tensor_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.metadata_kv_count.to_le_bytes());
        out
    }
}

/// Parse a GGUF header from its first 24 bytes.
pub fn parse_header(bytes: &[u8], file_size: u64) -> Result<ModelFileInfo, ModelFileError> {
    if bytes.len() < GGUF_HEADER_LEN {
        return Err(ModelFileError::InvalidFormat(format!(
            "truncated header ({} of {GGUF_HEADER_LEN} bytes)",
            bytes.len()
        )));
    }
    if bytes[0..4] != GGUF_MAGIC {
        return Err(ModelFileError::InvalidFormat(format!(
            "bad magic {:02x?}",
            &bytes[0..4]
        )));
    }

    let u32_at = |at: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(b)
    };
    let u64_at = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(b)
    };

    let version = u32_at(4);
    if version < MIN_GGUF_VERSION {
        return Err(ModelFileError::InvalidFormat(format!(
            "unsupported GGUF version {version}"
        )));
    }

    Ok(ModelFileInfo {
        version,
        tensor_count: u64_at(8),
        metadata_kv_count: u64_at(16),
        file_size,
    })
}

/// Check that `path` is an existing GGUF file and return its header.
pub fn inspect(path: &Path) -> Result<ModelFileInfo, ModelFileError> {
    if !path.exists() {
        return Err(ModelFileError::NotFound(path.display().to_string()));
    }
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(ModelFileError::NotAFile(path.display().to_string()));
    }

    let mut header = Vec::with_capacity(GGUF_HEADER_LEN);
    File::open(path)?
        .take(GGUF_HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    let info = parse_header(&header, meta.len())?;

    info!(
        path = %path.display(),
        version = info.version,
        tensors = info.tensor_count,
        metadata = info.metadata_kv_count,
        size = info.file_size,
        "Model file inspected"
    );

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ModelFileInfo {
        ModelFileInfo {
            version: 3,
            tensor_count: 291,
            metadata_kv_count: 24,
            file_size: 0,
        }
    }

    #[test]
    fn test_header_parses() {
        let bytes = sample_info().header_bytes();
        let parsed = parse_header(&bytes, 0).unwrap();
        assert_eq!(parsed, sample_info());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_info().header_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            parse_header(&bytes, 0),
            Err(ModelFileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_old_version_rejected() {
        let mut info = sample_info();
        info.version = 1;
        assert!(parse_header(&info.header_bytes(), 0).is_err());
    }

    #[test]
    fn test_inspect_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        let mut data = sample_info().header_bytes().to_vec();
        data.extend_from_slice(&[0u8; 100]);
        std::fs::write(&path, &data).unwrap();

        let info = inspect(&path).unwrap();
        assert_eq!(info.version, 3);
        assert_eq!(info.file_size, 124);
    }

    #[test]
    fn test_inspect_missing_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            inspect(&dir.path().join("missing.gguf")),
            Err(ModelFileError::NotFound(_))
        ));
        assert!(matches!(inspect(dir.path()), Err(ModelFileError::NotAFile(_))));
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.gguf");
        std::fs::write(&path, b"GGUF").unwrap();
        assert!(matches!(inspect(&path), Err(ModelFileError::InvalidFormat(_))));
    }
}
