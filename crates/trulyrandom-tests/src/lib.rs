//! NIST SP 800-22 inspired randomness test battery.
//!
//! Eight statistical tests over a batch of bytes, bundled as a [`Battery`]
//! that plugs into a [`Tester`](trulyrandom_core::Tester) module as its
//! [`TestSuite`](trulyrandom_core::TestSuite):
//!
//! ```no_run
//! use trulyrandom_core::Tester;
//! use trulyrandom_tests::Battery;
//!
//! let tester = Tester::new(Box::new(Battery::default()));
//! # tester.dispose();
//! ```
//!
//! Each test yields an [`Evaluation`] with a p-value; a test passes when the
//! p-value is at least the battery's significance level.

pub mod battery;
pub mod frequency;
pub mod patterns;
pub mod runs;
pub mod sample;
pub mod walk;

use statrs::distribution::{ChiSquared, ContinuousCDF};
use trulyrandom_core::SingleTestResult;

pub use battery::{Battery, StatTest};
pub use sample::Sample;

/// Outcome of one test on one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub name: &'static str,
    /// `None` when the sample was too short or the statistic undefined.
    pub p_value: Option<f64>,
    pub statistic: f64,
    pub details: String,
}

impl Evaluation {
    pub(crate) fn new(
        name: &'static str,
        p_value: Option<f64>,
        statistic: f64,
        details: String,
    ) -> Self {
        Self {
            name,
            p_value,
            statistic,
            details,
        }
    }

    pub(crate) fn insufficient(name: &'static str, needed_bits: usize, got_bits: usize) -> Self {
        Self::new(
            name,
            None,
            0.0,
            format!("Insufficient data: need {needed_bits} bits, got {got_bits}"),
        )
    }

    /// Whether the p-value reaches `alpha`. Tests without a p-value fail.
    pub fn passed(&self, alpha: f64) -> bool {
        self.p_value.is_some_and(|p| p >= alpha)
    }

    pub fn to_result(&self, alpha: f64) -> SingleTestResult {
        SingleTestResult {
            name: self.name.to_string(),
            passed: self.passed(alpha),
            p_value: self.p_value,
        }
    }
}

/// Upper tail of the chi-squared distribution with `df` degrees of freedom.
pub(crate) fn chi_squared_sf(df: f64, statistic: f64) -> Option<f64> {
    ChiSquared::new(df).ok().map(|dist| dist.sf(statistic))
}
