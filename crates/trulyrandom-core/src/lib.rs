//! # trulyrandom-core
//!
//! Post-processing pipeline for true random numbers.
//!
//! Raw entropy from physical or OS sources is usually biased and correlated.
//! This crate wires sources and randomness extractors into a graph of
//! self-regulating [`Module`]s. Every module owns a bounded output buffer and
//! a worker thread; downstream modules pull from upstream ones, and a module
//! whose buffer fills up pauses until it has been drained.
//!
//! ## Quick Start
//!
//! ```no_run
//! use trulyrandom_core::{ClockJitterSource, HashExtractor, SourceModule, VonNeumannExtractor};
//!
//! let device = SourceModule::new(Box::new(ClockJitterSource::default()));
//! let debias = VonNeumannExtractor::new();
//! debias.add_source(&device).unwrap();
//! let hash = HashExtractor::new();
//! hash.add_source(&debias).unwrap();
//!
//! device.start();
//! debias.start();
//! hash.start();
//!
//! let output = hash.data_source();
//! let value = output.next_u64();
//! # let _ = value;
//! ```
//!
//! ## Architecture
//!
//! Source → Extractor → … → Extractor → consumer
//!
//! Extractors size their batches by the fill level of a downstream buffer, so
//! the graph compresses harder while consumers are slow and streams faster
//! when they keep up:
//! - **Shuffle**: Fisher–Yates permutation of byte blocks, driven by bits
//!   of the batch itself (optionally XORed with a seed).
//! - **VonNeumann**: classic bit-pair debiasing.
//! - **Hash**: SHA-2 compression of fixed input blocks.
//!
//! [`Buffer`] accumulates and optionally spills to a [`Spillover`] store;
//! [`Tester`] forwards only batches that pass a [`TestSuite`].

pub mod buffer;
pub mod config;
pub mod data_source;
pub mod error;
pub mod extractor;
mod mixing;
pub mod module;
pub mod ring_buffer;
pub mod source;
pub mod sources;
pub mod spillover;
pub mod tester;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use buffer::Buffer;
pub use config::{ExtractorConfig, ModuleConfig, SeedConfig, SpilloverPolicy};
pub use data_source::DataSource;
pub use error::{Error, Result};
pub use extractor::{
    BatchContext, Extractor, HashCompressor, HashExtractor, HashFunction, SeededTransform,
    Seedable, Shuffle, ShuffleExtractor, Transform, VonNeumann, VonNeumannExtractor,
    batch_multiplier, shuffle_blocks, von_neumann_debias,
};
pub use module::{
    Module, Node, RunState, Stage, StepOutcome, normalized_entropy, shannon_entropy,
};
pub use ring_buffer::RingBuffer;
pub use source::{EntropySource, SourceCategory, SourceInfo};
pub use sources::{ClockJitterSource, OsEntropySource, SourceModule};
pub use spillover::{DirSpillover, MemorySpillover, Spillover};
pub use tester::{FullTestResult, SingleTestResult, TestSuite, Tester};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lock a mutex, recovering the data of a poisoned lock. Worker panics are
/// caught and logged; the state they guard stays usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
