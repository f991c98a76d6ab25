//! Tunable defaults and serializable configuration structs.
//!
//! Every struct here is `#[serde(default)]`, so a partial JSON/TOML document
//! deserializes into a complete configuration. Loading documents is left to
//! the embedding application; this crate only validates and applies them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default output buffer capacity of a module (10 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// Default occupancy ratio at which an overflow-paused module resumes.
pub const DEFAULT_OVERFLOW_HYSTERESIS: f64 = 0.5;
/// Period of the shared statistics scheduler.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);
/// Window over which throughput is averaged.
pub const BPS_WINDOW: Duration = Duration::from_secs(5);
/// Samples required before the pause-inclusive rate is reported.
pub const BPS_MIN_SAMPLES: usize = 10;
/// Trailing bytes considered by the entropy estimate.
pub const ENTROPY_WINDOW_BYTES: usize = 100_000;
/// Minimum time between two automatic entropy computations.
pub const ENTROPY_PERIOD: Duration = Duration::from_secs(1);
/// Sleep of a worker whose step found nothing to do.
pub const IDLE_SLEEP: Duration = Duration::from_millis(2);
/// Longest a parked worker waits before re-checking its stop flag.
pub const PARK_TIMEOUT: Duration = Duration::from_millis(50);
/// Upper bound for a single pass-through pull from a source.
pub const PULL_LIMIT: usize = 1024 * 1024;

/// Default ceiling for extractor batches.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10 * 1024 * 1024;
/// Default seed length in bytes.
pub const DEFAULT_SEED_LENGTH: usize = 64;
/// Default interval between two seed rotations.
pub const DEFAULT_SEED_ROTATION_INTERVAL: Duration = Duration::from_secs(10);

/// Settings shared by every module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Display/thread name; `None` keeps the current name.
    pub name: Option<String>,
    /// Higher-priority sources are pulled first by downstream modules.
    pub priority: i32,
    /// Output buffer capacity in bytes.
    pub buffer_size: usize,
    /// Pause the worker while the output buffer is full.
    pub pause_on_overflow: bool,
    /// Occupancy ratio at or below which an overflow pause ends.
    pub overflow_hysteresis: f64,
    /// Track the entropy of recently produced bytes.
    pub calculate_entropy: bool,
    /// Track throughput.
    pub calculate_bps: bool,
    /// Interleave bytes of several sources instead of draining them in turn.
    pub mix_sources: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: None,
            priority: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            pause_on_overflow: true,
            overflow_hysteresis: DEFAULT_OVERFLOW_HYSTERESIS,
            calculate_entropy: false,
            calculate_bps: true,
            mix_sources: true,
        }
    }
}

impl ModuleConfig {
    pub fn validate(&self) -> Result<()> {
        validate_buffer_size(self.buffer_size)?;
        validate_hysteresis(self.overflow_hysteresis)
    }
}

/// Batch settings of an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Target batch size; `None` keeps the transform's default.
    pub batch_size: Option<usize>,
    /// Ceiling applied after the dynamic multiplier.
    pub max_batch_size: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(batch) = self.batch_size {
            validate_batch_size(batch)?;
        }
        validate_batch_size(self.max_batch_size)
    }
}

/// Seeding settings of a seedable extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Bytes pulled from the seed source per rotation.
    pub seed_length: usize,
    /// Milliseconds between two rotations.
    pub rotation_interval_ms: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            seed_length: DEFAULT_SEED_LENGTH,
            rotation_interval_ms: duration_millis(DEFAULT_SEED_ROTATION_INTERVAL),
        }
    }
}

impl SeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.seed_length < 1 {
            return Err(Error::config("Seed length should be >= 1"));
        }
        Ok(())
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_interval_ms)
    }
}

/// When a [`Buffer`](crate::Buffer) moves data to and from its spillover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpilloverPolicy {
    /// Bytes per saved chunk.
    pub chunk_size: usize,
    /// Load chunks back while fewer bytes than this are buffered.
    pub min_bytes_in_buffer: usize,
    /// Save chunks while more bytes than this are buffered.
    pub max_bytes_in_buffer: usize,
}

impl Default for SpilloverPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            min_bytes_in_buffer: 1024 * 1024,
            max_bytes_in_buffer: 8 * 1024 * 1024,
        }
    }
}

impl SpilloverPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 1 {
            return Err(Error::config("Spillover chunk size should be >= 1"));
        }
        if self.min_bytes_in_buffer >= self.max_bytes_in_buffer {
            return Err(Error::config(format!(
                "Spillover thresholds out of order: min {} >= max {}",
                self.min_bytes_in_buffer, self.max_bytes_in_buffer
            )));
        }
        if self.max_bytes_in_buffer.checked_add(self.chunk_size).is_none() {
            return Err(Error::config(format!(
                "Spillover threshold {} plus chunk {} overflows",
                self.max_bytes_in_buffer, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn validate_buffer_size(size: usize) -> Result<()> {
    if size < 1 {
        return Err(Error::config("Buffer size should be >= 1"));
    }
    Ok(())
}

pub(crate) fn validate_hysteresis(value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::config(format!(
            "Overflow hysteresis should be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_batch_size(size: usize) -> Result<()> {
    if size < 1 {
        return Err(Error::config("Batch size should be >= 1"));
    }
    Ok(())
}
