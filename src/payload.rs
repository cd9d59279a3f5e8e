//! Checkpoint payload source
//!
//! Every writer replays the same payload each checkpoint: the contents of a
//! single source file, loaded once per process and shared read-only across
//! all rank threads. A band's payload size selects a prefix of the buffer.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::JobConfig;
use crate::constants;
use crate::error::{CdbbError, Result};

static PROCESS_PAYLOAD: OnceCell<Payload> = OnceCell::new();

/// Shared, read-only checkpoint payload buffer
#[derive(Debug, Clone)]
pub struct Payload {
    bytes: Arc<Vec<u8>>,
}

impl Payload {
    /// Wrap an in-memory buffer; the test suite's entry point
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    /// Read an entire source file into memory
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(CdbbError::config(format!(
                "payload source {} is empty",
                path.display()
            )));
        }
        Ok(Self::from_bytes(bytes))
    }

    /// Load the process-wide payload from the built-in source path; the
    /// file is read at most once per process
    pub fn load_default() -> Result<&'static Payload> {
        PROCESS_PAYLOAD.get_or_try_init(|| Self::from_file(constants::DEFAULT_PAYLOAD_SOURCE))
    }

    /// Length of the source buffer in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the source buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The first `size` bytes, the slice one checkpoint stages
    pub fn slice(&self, size: u64) -> Result<&[u8]> {
        let size = size as usize;
        if size > self.bytes.len() {
            return Err(CdbbError::config(format!(
                "payload of {size} bytes requested from a {}-byte source",
                self.bytes.len()
            )));
        }
        Ok(&self.bytes[..size])
    }

    /// Check that every band's payload size fits this source buffer
    pub fn ensure_covers(&self, config: &JobConfig) -> Result<()> {
        for band in &config.bands {
            if band.payload_size as usize > self.bytes.len() {
                return Err(CdbbError::config(format!(
                    "band {} needs {} payload bytes but the source holds {}",
                    band.index,
                    band.payload_size,
                    self.bytes.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandConfig;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_slice_returns_prefix() {
        let payload = Payload::from_bytes(vec![1, 2, 3, 4, 5]);
        assert_eq!(payload.slice(3).unwrap(), &[1, 2, 3]);
        assert_eq!(payload.slice(5).unwrap().len(), 5);
    }

    #[test]
    fn test_oversized_slice_rejected() {
        let payload = Payload::from_bytes(vec![0; 4]);
        assert!(payload.slice(5).is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"checkpoint-bytes").unwrap();
        let payload = Payload::from_file(file.path()).unwrap();
        assert_eq!(payload.slice(10).unwrap(), b"checkpoint");
    }

    #[test]
    fn test_empty_source_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(Payload::from_file(file.path()).is_err());
    }

    #[test]
    fn test_ensure_covers_flags_short_source() {
        let payload = Payload::from_bytes(vec![0; 16]);
        let config = JobConfig::new(16).with_band(BandConfig {
            index: 1,
            rank_lo: 1,
            rank_hi: 2,
            payload_size: 32,
            initial_delay: Duration::ZERO,
            period: Duration::from_millis(10),
        });
        assert!(payload.ensure_covers(&config).is_err());

        let payload = Payload::from_bytes(vec![0; 64]);
        assert!(payload.ensure_covers(&config).is_ok());
    }
}
