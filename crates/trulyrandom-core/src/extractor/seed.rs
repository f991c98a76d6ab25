//! Seed state of a seedable extractor.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::{Duration, Instant, SystemTime};

use sha2::{Digest, Sha512};

use crate::config::{DEFAULT_SEED_LENGTH, DEFAULT_SEED_ROTATION_INTERVAL, duration_millis};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::{lock, read_lock, write_lock};

#[derive(Debug)]
pub(crate) struct SeedState {
    /// Explicit seed or the latest one pulled from the source.
    seed: Mutex<Option<Arc<[u8]>>>,
    /// Used until a seed is set; derived once so output stays reproducible
    /// for identical input.
    pseudo: OnceLock<Arc<[u8]>>,
    length: AtomicUsize,
    interval_ms: AtomicU64,
    source: RwLock<Option<Weak<Module>>>,
    last_rotation: Mutex<Option<Instant>>,
    /// A rotation was due but the source was short.
    pending: AtomicBool,
}

impl SeedState {
    pub(crate) fn new() -> Self {
        Self {
            seed: Mutex::new(None),
            pseudo: OnceLock::new(),
            length: AtomicUsize::new(DEFAULT_SEED_LENGTH),
            interval_ms: AtomicU64::new(duration_millis(DEFAULT_SEED_ROTATION_INTERVAL)),
            source: RwLock::new(None),
            last_rotation: Mutex::new(None),
            pending: AtomicBool::new(false),
        }
    }

    /// Seed for the next batch.
    pub(crate) fn current(&self) -> Arc<[u8]> {
        if let Some(seed) = lock(&self.seed).as_ref() {
            return Arc::clone(seed);
        }
        Arc::clone(
            self.pseudo
                .get_or_init(|| pseudo_seed(self.length()).into()),
        )
    }

    pub(crate) fn set(&self, seed: &[u8]) -> Result<()> {
        if seed.is_empty() {
            return Err(Error::config("Seed should be at least 1 byte long"));
        }
        *lock(&self.seed) = Some(Arc::from(seed));
        Ok(())
    }

    pub(crate) fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    pub(crate) fn set_length(&self, length: usize) -> Result<()> {
        if length < 1 {
            return Err(Error::config("Seed length should be >= 1"));
        }
        self.length.store(length, Ordering::Release);
        Ok(())
    }

    pub(crate) fn rotation_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub(crate) fn set_rotation_interval(&self, interval: Duration) {
        self.interval_ms
            .store(duration_millis(interval), Ordering::Release);
    }

    pub(crate) fn set_source(&self, source: Option<&Arc<Module>>, owner: &str) {
        *write_lock(&self.source) = source.map(Arc::downgrade);
        if source.is_some() {
            self.rotate(true, owner);
        } else {
            self.pending.store(false, Ordering::Release);
        }
    }

    /// Rotate if a source is set and the interval elapsed or an earlier
    /// rotation is still pending.
    pub(crate) fn maybe_rotate(&self, owner: &str) {
        if read_lock(&self.source).is_none() {
            return;
        }
        let due = self.pending.load(Ordering::Acquire)
            || lock(&self.last_rotation)
                .is_none_or(|last| last.elapsed() >= self.rotation_interval());
        if due {
            self.rotate(false, owner);
        }
    }

    /// Pull a fresh seed from the source. The old seed stays in place when
    /// the source cannot supply a full seed.
    pub(crate) fn rotate(&self, forced: bool, owner: &str) -> bool {
        let Some(source) = read_lock(&self.source).as_ref().and_then(Weak::upgrade) else {
            if forced {
                log::warn!("{owner}: seed rotation requested without a seed source");
            }
            return false;
        };
        let length = self.length();
        let fresh = source.read_exactly(length);
        if fresh.len() < length {
            if forced || !self.pending.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "{owner}: seed source '{}' holds {} of {length} bytes, keeping the old seed",
                    source.name(),
                    source.bytes_in_buffer()
                );
            }
            self.pending.store(true, Ordering::Release);
            return false;
        }
        *lock(&self.seed) = Some(fresh.into());
        *lock(&self.last_rotation) = Some(Instant::now());
        self.pending.store(false, Ordering::Release);
        log::debug!("{owner}: seed rotated from '{}'", source.name());
        true
    }
}

/// OS randomness, or a hash of the clock when the OS cannot provide any.
fn pseudo_seed(length: usize) -> Vec<u8> {
    let mut seed = vec![0u8; length];
    if let Err(e) = getrandom::fill(&mut seed) {
        log::warn!("OS randomness unavailable ({e}); deriving pseudo-seed from the clock");
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut state = Sha512::digest(nanos.to_le_bytes()).to_vec();
        for chunk in seed.chunks_mut(state.len()) {
            chunk.copy_from_slice(&state[..chunk.len()]);
            state = Sha512::digest(&state).to_vec();
        }
    }
    seed
}
