//! Overflow storage for [`Buffer`](crate::Buffer) modules.
//!
//! A spillover holds whole chunks of bytes, loaded back oldest first. Both
//! implementations are bounded: saving past the chunk limit evicts the oldest
//! chunk, mirroring the overwrite-oldest behavior of the ring buffer.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::lock;

/// Chunked byte store.
pub trait Spillover: Send + Sync {
    /// Store one chunk.
    fn save(&self, data: &[u8]) -> Result<()>;

    /// Remove and return the oldest chunk, `None` when empty.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Drop every stored chunk.
    fn clear(&self) -> Result<()>;

    fn count_available_chunks(&self) -> usize;
}

/// In-memory spillover.
#[derive(Debug)]
pub struct MemorySpillover {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    max_chunks: usize,
}

impl MemorySpillover {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            max_chunks: max_chunks.max(1),
        }
    }
}

impl Spillover for MemorySpillover {
    fn save(&self, data: &[u8]) -> Result<()> {
        let mut chunks = lock(&self.chunks);
        chunks.push_back(data.to_vec());
        while chunks.len() > self.max_chunks {
            chunks.pop_front();
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.chunks).pop_front())
    }

    fn clear(&self) -> Result<()> {
        lock(&self.chunks).clear();
        Ok(())
    }

    fn count_available_chunks(&self) -> usize {
        lock(&self.chunks).len()
    }
}

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_EXTENSION: &str = "bin";

/// One raw file per chunk in a directory: `chunk-<sequence>.bin`.
///
/// Chunks left behind by an earlier instance in the same directory are
/// picked up again on construction.
#[derive(Debug)]
pub struct DirSpillover {
    dir: PathBuf,
    max_chunks: usize,
    state: Mutex<DirState>,
}

#[derive(Debug, Default)]
struct DirState {
    /// Sequence numbers of stored chunks, oldest first.
    chunks: VecDeque<u64>,
    next: u64,
}

impl DirSpillover {
    pub fn new(dir: impl AsRef<Path>, max_chunks: usize) -> Result<Self> {
        if max_chunks < 1 {
            return Err(Error::config("Spillover chunk limit should be >= 1"));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut existing: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_chunk_name(&entry.path()))
            .collect();
        existing.sort_unstable();
        let next = existing.last().map_or(0, |last| last + 1);
        if !existing.is_empty() {
            log::debug!(
                "spillover {}: resuming with {} chunks",
                dir.display(),
                existing.len()
            );
        }

        let spillover = Self {
            dir,
            max_chunks,
            state: Mutex::new(DirState {
                chunks: existing.into(),
                next,
            }),
        };
        spillover.evict_excess(&mut lock(&spillover.state))?;
        Ok(spillover)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("{CHUNK_PREFIX}{sequence:012}.{CHUNK_EXTENSION}"))
    }

    fn evict_excess(&self, state: &mut DirState) -> Result<()> {
        while state.chunks.len() > self.max_chunks {
            if let Some(oldest) = state.chunks.pop_front() {
                remove_if_present(&self.chunk_path(oldest))?;
            }
        }
        Ok(())
    }
}

impl Spillover for DirSpillover {
    fn save(&self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let sequence = state.next;
        fs::write(self.chunk_path(sequence), data)?;
        state.next += 1;
        state.chunks.push_back(sequence);
        self.evict_excess(&mut state)
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        let mut state = lock(&self.state);
        let Some(&oldest) = state.chunks.front() else {
            return Ok(None);
        };
        let path = self.chunk_path(oldest);
        let data = fs::read(&path)?;
        fs::remove_file(&path)?;
        state.chunks.pop_front();
        Ok(Some(data))
    }

    fn clear(&self) -> Result<()> {
        let mut state = lock(&self.state);
        while let Some(sequence) = state.chunks.pop_front() {
            remove_if_present(&self.chunk_path(sequence))?;
        }
        Ok(())
    }

    fn count_available_chunks(&self) -> usize {
        lock(&self.state).chunks.len()
    }
}

fn parse_chunk_name(path: &Path) -> Option<u64> {
    if path.extension()? != CHUNK_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(CHUNK_PREFIX)?
        .parse()
        .ok()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
