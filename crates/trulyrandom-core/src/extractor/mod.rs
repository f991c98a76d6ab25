//! Randomness extractors.
//!
//! An [`Extractor`] is a [`Module`] whose worker repeatedly pulls a batch of
//! bytes from its sources, runs it through a [`Transform`] and appends the
//! result to its own buffer:
//!
//! ```text
//! sources ──pull_exactly(actual_batch_size)──▶ Transform ──add_data──▶ buffer
//! ```
//!
//! The batch size adapts to downstream pressure. The *dynamic coefficient*
//! is the fill ratio of a designated downstream module (by default the
//! extractor's own buffer); the fuller it is, the larger the batches and the
//! stronger the compression.
//!
//! Transforms never fail on short input. They return an empty batch and the
//! input still counts as consumed.

mod hash;
mod seed;
mod shuffle;
mod von_neumann;

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crate::config::{self, DEFAULT_MAX_BATCH_SIZE, ExtractorConfig, SeedConfig};
use crate::data_source::DataSource;
use crate::error::Result;
use crate::module::{AtomicF64, Module, Node, Stage, StepOutcome};
use crate::{read_lock, write_lock};

pub use hash::{HashCompressor, HashFunction};
pub use shuffle::{Shuffle, shuffle_blocks};
pub use von_neumann::{VonNeumann, von_neumann_debias};

use seed::SeedState;

pub type ShuffleExtractor = Extractor<Shuffle>;
pub type VonNeumannExtractor = Extractor<VonNeumann>;
pub type HashExtractor = Extractor<HashCompressor>;

/// Batch multiplier for a dynamic coefficient.
///
/// | coefficient  | multiplier |
/// |--------------|------------|
/// | `> 0.8`      | 5          |
/// | `(0.5, 0.8]` | 3          |
/// | `(0.2, 0.5]` | 2          |
/// | `<= 0.2`     | 1          |
pub fn batch_multiplier(dynamic_coefficient: f64) -> usize {
    if dynamic_coefficient > 0.8 {
        5
    } else if dynamic_coefficient > 0.5 {
        3
    } else if dynamic_coefficient > 0.2 {
        2
    } else {
        1
    }
}

/// Per-batch inputs besides the data itself.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    /// Current seed; empty for unseeded transforms.
    pub seed: &'a [u8],
    pub dynamic_coefficient: f64,
}

/// The algorithm an [`Extractor`] applies to each batch.
pub trait Transform: Send + Sync + 'static {
    /// Default module name.
    const NAME: &'static str;
    /// Whether batches are processed with a seed. Seeded transforms also
    /// implement [`SeededTransform`].
    const SEEDED: bool = false;

    fn default_batch_size(&self) -> usize;

    /// Number of bytes pulled for the next batch.
    fn actual_batch_size(&self, batch_size: usize, dynamic_coefficient: f64, max: usize) -> usize {
        batch_size
            .saturating_mul(batch_multiplier(dynamic_coefficient))
            .min(max)
    }

    /// Transform one batch. Insufficient material yields an empty result.
    fn process(&self, data: &[u8], ctx: &BatchContext<'_>) -> Vec<u8>;

    /// Input/output ratio known in advance, if any. Otherwise the observed
    /// ratio is reported.
    fn nominal_compression(&self, _dynamic_coefficient: f64) -> Option<f64> {
        None
    }
}

/// Marker for transforms that consume a seed.
pub trait SeededTransform: Transform {}

pub(crate) struct ExtractorStage<T> {
    transform: T,
    batch_size: AtomicUsize,
    max_batch_size: AtomicUsize,
    dynamic_coefficient_source: RwLock<Option<Weak<Module>>>,
    seed: SeedState,
    consumed: AtomicU64,
    produced: AtomicU64,
    last_dynamic_coefficient: AtomicF64,
    no_data_to_process: AtomicBool,
}

impl<T: Transform> ExtractorStage<T> {
    fn new(transform: T) -> Self {
        Self {
            batch_size: AtomicUsize::new(transform.default_batch_size()),
            transform,
            max_batch_size: AtomicUsize::new(DEFAULT_MAX_BATCH_SIZE),
            dynamic_coefficient_source: RwLock::new(None),
            seed: SeedState::new(),
            consumed: AtomicU64::new(0),
            produced: AtomicU64::new(0),
            last_dynamic_coefficient: AtomicF64::new(0.0),
            no_data_to_process: AtomicBool::new(false),
        }
    }

    fn dynamic_coefficient(&self, module: &Module) -> f64 {
        read_lock(&self.dynamic_coefficient_source)
            .as_ref()
            .and_then(Weak::upgrade)
            .map_or_else(|| module.buffer_state(), |source| source.buffer_state())
    }

    fn actual_batch_size(&self, dynamic_coefficient: f64) -> usize {
        self.transform
            .actual_batch_size(
                self.batch_size.load(Ordering::Acquire),
                dynamic_coefficient,
                self.max_batch_size.load(Ordering::Acquire),
            )
            .max(1)
    }
}

impl<T: Transform> Stage for ExtractorStage<T> {
    fn step(&self, module: &Module) -> StepOutcome {
        if T::SEEDED {
            self.seed.maybe_rotate(&module.name());
        }
        let dynamic_coefficient = self.dynamic_coefficient(module);
        self.last_dynamic_coefficient.store(dynamic_coefficient);
        let count = self.actual_batch_size(dynamic_coefficient);

        let Some(batch) = module.pull_exactly(count) else {
            self.no_data_to_process.store(true, Ordering::Release);
            return StepOutcome::Idle;
        };
        self.no_data_to_process.store(false, Ordering::Release);

        let seed = if T::SEEDED {
            self.seed.current()
        } else {
            Arc::from(Vec::new())
        };
        let ctx = BatchContext {
            seed: &seed,
            dynamic_coefficient,
        };
        let output = self.transform.process(&batch, &ctx);
        if output.is_empty() {
            log::debug!(
                "{}: batch of {} bytes yielded no output",
                module.name(),
                batch.len()
            );
        } else {
            self.produced
                .fetch_add(output.len() as u64, Ordering::AcqRel);
            module.add_data(&output);
        }
        // Counted last: once a batch shows up here its output is buffered.
        self.consumed
            .fetch_add(batch.len() as u64, Ordering::AcqRel);
        StepOutcome::Progress
    }
}

/// A module running a [`Transform`] over batches pulled from its sources.
///
/// Dereferences to [`Module`] for lifecycle, reads and statistics. Clones
/// share the same module.
pub struct Extractor<T: Transform> {
    module: Arc<Module>,
    stage: Arc<ExtractorStage<T>>,
}

impl<T: Transform + Default> Extractor<T> {
    pub fn new() -> Self {
        Self::with_transform(T::default())
    }
}

impl<T: Transform + Default> Default for Extractor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transform> Extractor<T> {
    /// Create a stopped extractor around `transform`.
    pub fn with_transform(transform: T) -> Self {
        let stage = Arc::new(ExtractorStage::new(transform));
        let module = Module::new(T::NAME, Arc::clone(&stage) as Arc<dyn Stage>);
        Self { module, stage }
    }

    pub fn transform(&self) -> &T {
        &self.stage.transform
    }

    pub fn data_source(&self) -> DataSource {
        DataSource::new(&self.module)
    }

    /// Target batch size before the dynamic multiplier.
    pub fn batch_size(&self) -> usize {
        self.stage.batch_size.load(Ordering::Acquire)
    }

    pub fn set_batch_size(&self, size: usize) -> Result<()> {
        config::validate_batch_size(size)?;
        self.stage.batch_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn max_batch_size(&self) -> usize {
        self.stage.max_batch_size.load(Ordering::Acquire)
    }

    pub fn set_max_batch_size(&self, size: usize) -> Result<()> {
        config::validate_batch_size(size)?;
        self.stage.max_batch_size.store(size, Ordering::Release);
        Ok(())
    }

    /// Bytes the next batch will pull, given the current coefficient.
    pub fn actual_batch_size(&self) -> usize {
        self.stage.actual_batch_size(self.dynamic_coefficient())
    }

    /// Fill ratio of the coefficient source (or of this extractor's buffer).
    pub fn dynamic_coefficient(&self) -> f64 {
        self.stage.dynamic_coefficient(&self.module)
    }

    /// Coefficient observed by the most recent batch attempt.
    pub fn last_dynamic_coefficient(&self) -> f64 {
        self.stage.last_dynamic_coefficient.load()
    }

    /// Derive the batch size from `source`'s fill ratio instead of this
    /// extractor's own. `None` restores the default.
    pub fn set_dynamic_coefficient_source(&self, source: Option<&dyn Node>) {
        *write_lock(&self.stage.dynamic_coefficient_source) =
            source.map(|node| Arc::downgrade(node.module()));
    }

    pub fn total_bytes_consumed(&self) -> u64 {
        self.stage.consumed.load(Ordering::Acquire)
    }

    pub fn total_bytes_produced(&self) -> u64 {
        self.stage.produced.load(Ordering::Acquire)
    }

    /// Whether the last batch attempt found too little upstream data.
    pub fn no_data_to_process(&self) -> bool {
        self.stage.no_data_to_process.load(Ordering::Acquire)
    }

    /// Input bytes per output byte. `0.0` before any output for transforms
    /// without a nominal ratio.
    pub fn actual_compression(&self) -> f64 {
        if let Some(nominal) = self
            .stage
            .transform
            .nominal_compression(self.dynamic_coefficient())
        {
            return nominal;
        }
        let produced = self.total_bytes_produced();
        if produced == 0 {
            return 0.0;
        }
        self.total_bytes_consumed() as f64 / produced as f64
    }

    /// Validate and apply `config` as a whole.
    pub fn apply_config(&self, config: &ExtractorConfig) -> Result<()> {
        config.validate()?;
        if let Some(batch) = config.batch_size {
            self.stage.batch_size.store(batch, Ordering::Release);
        }
        self.stage
            .max_batch_size
            .store(config.max_batch_size, Ordering::Release);
        Ok(())
    }
}

impl<T: Transform> Deref for Extractor<T> {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

impl<T: Transform> Node for Extractor<T> {
    fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

impl<T: Transform> Clone for Extractor<T> {
    fn clone(&self) -> Self {
        Self {
            module: Arc::clone(&self.module),
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T: Transform> std::fmt::Debug for Extractor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("module", &self.module)
            .field("batch_size", &self.batch_size())
            .field("total_bytes_consumed", &self.total_bytes_consumed())
            .field("total_bytes_produced", &self.total_bytes_produced())
            .finish()
    }
}

/// Seed management of extractors whose transform consumes a seed.
///
/// The seed is XORed into the control bits of each batch. It is either set
/// explicitly, refreshed from a seed source module every
/// [`seed_rotation_interval`](Seedable::seed_rotation_interval), or, when
/// neither happened, a pseudo-seed derived once from the OS.
pub trait Seedable {
    /// Use `seed` until the next rotation. Fails on an empty seed.
    fn set_seed(&self, seed: &[u8]) -> Result<()>;

    /// Bytes pulled from the seed source per rotation.
    fn seed_length(&self) -> usize;

    fn set_seed_length(&self, length: usize) -> Result<()>;

    fn seed_rotation_interval(&self) -> Duration;

    fn set_seed_rotation_interval(&self, interval: Duration);

    /// Refresh the seed from `source`. Setting a source rotates immediately.
    fn set_seed_source(&self, source: Option<&dyn Node>);

    /// Rotate now. Returns `false` (keeping the old seed) when the source is
    /// missing or holds fewer than [`seed_length`](Seedable::seed_length)
    /// bytes; the rotation is retried before the next batch.
    fn force_rotate_seed(&self) -> bool;

    /// Validate and apply `config` as a whole.
    fn apply_seed_config(&self, config: &SeedConfig) -> Result<()>;
}

impl<T: SeededTransform> Seedable for Extractor<T> {
    fn set_seed(&self, seed: &[u8]) -> Result<()> {
        self.stage.seed.set(seed)
    }

    fn seed_length(&self) -> usize {
        self.stage.seed.length()
    }

    fn set_seed_length(&self, length: usize) -> Result<()> {
        self.stage.seed.set_length(length)
    }

    fn seed_rotation_interval(&self) -> Duration {
        self.stage.seed.rotation_interval()
    }

    fn set_seed_rotation_interval(&self, interval: Duration) {
        self.stage.seed.set_rotation_interval(interval);
    }

    fn set_seed_source(&self, source: Option<&dyn Node>) {
        self.stage
            .seed
            .set_source(source.map(|node| node.module()), &self.module.name());
    }

    fn force_rotate_seed(&self) -> bool {
        self.stage.seed.rotate(true, &self.module.name())
    }

    fn apply_seed_config(&self, config: &SeedConfig) -> Result<()> {
        config.validate()?;
        self.stage.seed.set_length(config.seed_length)?;
        self.stage
            .seed
            .set_rotation_interval(config.rotation_interval());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_multiplier_tiers() {
        assert_eq!(batch_multiplier(0.0), 1);
        assert_eq!(batch_multiplier(0.2), 1);
        assert_eq!(batch_multiplier(0.21), 2);
        assert_eq!(batch_multiplier(0.5), 2);
        assert_eq!(batch_multiplier(0.64), 3);
        assert_eq!(batch_multiplier(0.8), 3);
        assert_eq!(batch_multiplier(0.81), 5);
        assert_eq!(batch_multiplier(1.0), 5);
    }

    #[test]
    fn test_dynamic_batch_size_capped() {
        let extractor = ShuffleExtractor::new();
        extractor.set_batch_size(100).unwrap();
        extractor.set_max_batch_size(250).unwrap();

        let downstream = Module::passive("downstream");
        downstream.set_pause_on_overflow(false);
        downstream.set_buffer_size(100).unwrap();
        extractor.set_dynamic_coefficient_source(Some(&downstream));
        assert_eq!(extractor.actual_batch_size(), 100);

        downstream.add_data(&[0; 64]);
        assert!((extractor.dynamic_coefficient() - 0.64).abs() < 1e-12);
        // x3 would be 300; the ceiling wins.
        assert_eq!(extractor.actual_batch_size(), 250);
        extractor.set_max_batch_size(1000).unwrap();
        assert_eq!(extractor.actual_batch_size(), 300);

        extractor.set_dynamic_coefficient_source(None);
        assert_eq!(extractor.actual_batch_size(), 100);

        downstream.dispose();
        extractor.dispose();
    }

    #[test]
    fn test_invalid_batch_sizes() {
        let extractor = VonNeumannExtractor::new();
        assert!(extractor.set_batch_size(0).is_err());
        assert!(extractor.set_max_batch_size(0).is_err());
        let config = ExtractorConfig {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(extractor.apply_config(&config).is_err());
        assert_eq!(extractor.batch_size(), VonNeumann.default_batch_size());
        extractor.dispose();
    }

    #[test]
    fn test_compression_zero_before_output() {
        let extractor = VonNeumannExtractor::new();
        assert_eq!(extractor.actual_compression(), 0.0);
        assert_eq!(extractor.total_bytes_produced(), 0);
        extractor.dispose();
    }

    #[test]
    fn test_empty_seed_rejected() {
        let extractor = ShuffleExtractor::new();
        assert!(extractor.set_seed(&[]).is_err());
        assert!(extractor.set_seed_length(0).is_err());
        assert!(extractor.set_seed(&[1]).is_ok());
        extractor.dispose();
    }

    #[test]
    fn test_apply_seed_config() {
        let extractor = ShuffleExtractor::new();
        let config = SeedConfig {
            seed_length: 16,
            rotation_interval_ms: 500,
        };
        extractor.apply_seed_config(&config).unwrap();
        assert_eq!(extractor.seed_length(), 16);
        assert_eq!(
            extractor.seed_rotation_interval(),
            Duration::from_millis(500)
        );
        extractor.dispose();
    }
}
