//! Quality gate: forwards only batches that pass a statistical test suite.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config;
use crate::data_source::DataSource;
use crate::error::Result;
use crate::lock;
use crate::module::{Module, Node, Stage, StepOutcome};

const DEFAULT_BATCH_SIZE: usize = 125_000;

/// Outcome of one statistical test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleTestResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
}

/// Outcome of a whole suite over one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullTestResult {
    pub success: bool,
    /// Passed tests over performed tests, in `[0, 1]`.
    pub successful_test_proportion: f64,
    pub results: Vec<SingleTestResult>,
}

impl FullTestResult {
    /// Aggregate `results`; the batch succeeds when the failed share does not
    /// exceed `allowed_failed_proportion`. An empty result set fails.
    pub fn from_results(results: Vec<SingleTestResult>, allowed_failed_proportion: f64) -> Self {
        if results.is_empty() {
            return Self {
                success: false,
                successful_test_proportion: 0.0,
                results,
            };
        }
        let passed = results.iter().filter(|r| r.passed).count();
        let proportion = passed as f64 / results.len() as f64;
        Self {
            success: 1.0 - proportion <= allowed_failed_proportion,
            successful_test_proportion: proportion,
            results,
        }
    }
}

/// A battery of statistical tests over a byte sequence.
pub trait TestSuite: Send + Sync {
    fn perform(&self, data: &[u8]) -> FullTestResult;
}

struct TesterStage {
    suite: Box<dyn TestSuite>,
    batch_size: AtomicUsize,
    consumed: AtomicU64,
    tested: AtomicU64,
    failed: AtomicU64,
    last_result: Mutex<Option<FullTestResult>>,
}

impl Stage for TesterStage {
    fn step(&self, module: &Module) -> StepOutcome {
        let count = self.batch_size.load(Ordering::Acquire);
        let Some(batch) = module.pull_exactly(count) else {
            return StepOutcome::Idle;
        };
        let result = self.suite.perform(&batch);
        if result.success {
            module.add_data(&batch);
        } else {
            self.failed.fetch_add(1, Ordering::AcqRel);
            log::debug!(
                "{}: batch of {} bytes failed ({:.0}% of tests passed), discarded",
                module.name(),
                batch.len(),
                result.successful_test_proportion * 100.0
            );
        }
        *lock(&self.last_result) = Some(result);
        self.consumed
            .fetch_add(batch.len() as u64, Ordering::AcqRel);
        self.tested.fetch_add(1, Ordering::AcqRel);
        StepOutcome::Progress
    }
}

/// Pulls fixed-size batches, runs a [`TestSuite`] on each and forwards only
/// the batches that pass.
#[derive(Clone)]
pub struct Tester {
    module: Arc<Module>,
    stage: Arc<TesterStage>,
}

impl Tester {
    pub fn new(suite: Box<dyn TestSuite>) -> Self {
        let stage = Arc::new(TesterStage {
            suite,
            batch_size: AtomicUsize::new(DEFAULT_BATCH_SIZE),
            consumed: AtomicU64::new(0),
            tested: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_result: Mutex::new(None),
        });
        let module = Module::new("tester", Arc::clone(&stage) as Arc<dyn Stage>);
        Self { module, stage }
    }

    pub fn batch_size(&self) -> usize {
        self.stage.batch_size.load(Ordering::Acquire)
    }

    pub fn set_batch_size(&self, size: usize) -> Result<()> {
        config::validate_batch_size(size)?;
        self.stage.batch_size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn total_bytes_consumed(&self) -> u64 {
        self.stage.consumed.load(Ordering::Acquire)
    }

    pub fn batches_tested(&self) -> u64 {
        self.stage.tested.load(Ordering::Acquire)
    }

    pub fn batches_failed(&self) -> u64 {
        self.stage.failed.load(Ordering::Acquire)
    }

    /// Result for the most recent batch, if any was tested.
    pub fn last_test_result(&self) -> Option<FullTestResult> {
        lock(&self.stage.last_result).clone()
    }

    pub fn data_source(&self) -> DataSource {
        DataSource::new(&self.module)
    }
}

impl Deref for Tester {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

impl Node for Tester {
    fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

impl std::fmt::Debug for Tester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tester")
            .field("module", &self.module)
            .field("batches_tested", &self.batches_tested())
            .field("batches_failed", &self.batches_failed())
            .finish()
    }
}
