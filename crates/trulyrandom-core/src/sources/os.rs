//! Operating system randomness.

use crate::source::{EntropySource, SourceCategory, SourceInfo};

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Reads the OS CSPRNG through `getrandom`. Already conditioned by the
/// kernel; useful as a seed source or as a reference stream.
#[derive(Debug, Clone)]
pub struct OsEntropySource {
    chunk_size: usize,
}

impl OsEntropySource {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for OsEntropySource {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

static OS_INFO: SourceInfo = SourceInfo {
    name: "os_random",
    description: "Operating system CSPRNG (getrandom)",
    physics: "Kernel entropy pool fed by interrupt timing and hardware RNGs, \
              expanded by a CSPRNG.",
    category: SourceCategory::System,
    entropy_rate_estimate: 8.0,
};

impl EntropySource for OsEntropySource {
    fn info(&self) -> &SourceInfo {
        &OS_INFO
    }

    fn is_available(&self) -> bool {
        getrandom::fill(&mut [0u8; 1]).is_ok()
    }

    fn read_available_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.chunk_size];
        match getrandom::fill(&mut buf) {
            Ok(()) => buf,
            Err(e) => {
                log::warn!("{}: read failed: {e}", OS_INFO.name);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_chunk() {
        let source = OsEntropySource::new(64);
        assert!(source.is_available());
        let data = source.read_available_bytes();
        assert_eq!(data.len(), 64);
        assert!(data.iter().any(|&b| b != 0));
    }
}
