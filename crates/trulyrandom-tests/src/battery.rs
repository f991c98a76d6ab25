//! The test battery as a [`TestSuite`].

use std::fmt;

use trulyrandom_core::{Error, FullTestResult, Result, TestSuite};

use crate::sample::Sample;
use crate::{Evaluation, frequency, patterns, runs, walk};

/// Significance level below which a test fails.
pub const DEFAULT_ALPHA: f64 = 0.01;

/// One failure in eight tests is tolerated by default; at `alpha = 0.01`
/// a perfect source fails at least one of eight tests in about 8% of
/// batches.
pub const DEFAULT_ALLOWED_FAILED_TEST_PROPORTION: f64 = 0.125;

/// The statistical tests a [`Battery`] can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatTest {
    Monobit,
    BlockFrequency,
    ByteFrequency,
    Runs,
    LongestRunOfOnes,
    Serial,
    ApproximateEntropy,
    CumulativeSums,
}

impl StatTest {
    pub const ALL: [StatTest; 8] = [
        StatTest::Monobit,
        StatTest::BlockFrequency,
        StatTest::ByteFrequency,
        StatTest::Runs,
        StatTest::LongestRunOfOnes,
        StatTest::Serial,
        StatTest::ApproximateEntropy,
        StatTest::CumulativeSums,
    ];

    pub fn evaluate(self, sample: &Sample<'_>) -> Evaluation {
        match self {
            StatTest::Monobit => frequency::monobit(sample),
            StatTest::BlockFrequency => frequency::block_frequency(sample),
            StatTest::ByteFrequency => frequency::byte_frequency(sample),
            StatTest::Runs => runs::runs(sample),
            StatTest::LongestRunOfOnes => runs::longest_run_of_ones(sample),
            StatTest::Serial => patterns::serial(sample),
            StatTest::ApproximateEntropy => patterns::approximate_entropy(sample),
            StatTest::CumulativeSums => walk::cumulative_sums(sample),
        }
    }
}

impl fmt::Display for StatTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatTest::Monobit => "monobit",
            StatTest::BlockFrequency => "block_frequency",
            StatTest::ByteFrequency => "byte_frequency",
            StatTest::Runs => "runs",
            StatTest::LongestRunOfOnes => "longest_run_of_ones",
            StatTest::Serial => "serial",
            StatTest::ApproximateEntropy => "approximate_entropy",
            StatTest::CumulativeSums => "cumulative_sums",
        };
        f.write_str(name)
    }
}

/// A selection of [`StatTest`]s with a significance level and a tolerance
/// for failed tests per batch.
#[derive(Debug, Clone)]
pub struct Battery {
    tests: Vec<StatTest>,
    alpha: f64,
    allowed_failed_test_proportion: f64,
}

impl Default for Battery {
    fn default() -> Self {
        Self {
            tests: StatTest::ALL.to_vec(),
            alpha: DEFAULT_ALPHA,
            allowed_failed_test_proportion: DEFAULT_ALLOWED_FAILED_TEST_PROPORTION,
        }
    }
}

impl Battery {
    /// Battery running only `tests`.
    pub fn with_tests(tests: &[StatTest]) -> Result<Self> {
        if tests.is_empty() {
            return Err(Error::Configuration(
                "Test battery needs at least one test".into(),
            ));
        }
        Ok(Self {
            tests: tests.to_vec(),
            ..Self::default()
        })
    }

    pub fn tests(&self) -> &[StatTest] {
        &self.tests
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::Configuration(format!(
                "Significance level should be in (0, 1), got {alpha}"
            )));
        }
        self.alpha = alpha;
        Ok(())
    }

    pub fn allowed_failed_test_proportion(&self) -> f64 {
        self.allowed_failed_test_proportion
    }

    pub fn set_allowed_failed_test_proportion(&mut self, proportion: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&proportion) {
            return Err(Error::Configuration(format!(
                "Allowed failed test proportion should be in [0, 1], got {proportion}"
            )));
        }
        self.allowed_failed_test_proportion = proportion;
        Ok(())
    }

    /// Run every selected test. A test that panics is reported as failed
    /// without a p-value.
    pub fn evaluate(&self, data: &[u8]) -> Vec<Evaluation> {
        let sample = Sample::new(data);
        self.tests
            .iter()
            .map(|&test| {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| test.evaluate(&sample)))
                    .unwrap_or_else(|_| {
                        log::error!("test '{test}' panicked on a {} byte sample", data.len());
                        Evaluation::new("panicked", None, 0.0, format!("{test} panicked"))
                    })
            })
            .collect()
    }
}

impl TestSuite for Battery {
    fn perform(&self, data: &[u8]) -> FullTestResult {
        let results = self
            .evaluate(data)
            .iter()
            .map(|eval| eval.to_result(self.alpha))
            .collect();
        let full = FullTestResult::from_results(results, self.allowed_failed_test_proportion);
        if !full.success {
            let failed: Vec<&str> = full
                .results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.name.as_str())
                .collect();
            log::debug!("battery rejected {} bytes, failed: {failed:?}", data.len());
        }
        full
    }
}
