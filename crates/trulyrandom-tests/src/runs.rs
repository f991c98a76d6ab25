//! Run-length tests.

use statrs::function::erf::erfc;

use crate::sample::Sample;
use crate::{Evaluation, chi_squared_sf};

/// Number of runs of identical bits against what a fair coin gives.
///
/// Fails outright when the monobit proportion is already off by more than
/// `2 / sqrt(n)`.
pub fn runs(sample: &Sample<'_>) -> Evaluation {
    let name = "Runs";
    let bits = sample.bits();
    let n = bits.len();
    if n < 100 {
        return Evaluation::insufficient(name, 100, n);
    }
    let nf = n as f64;
    let pi = sample.ones() as f64 / nf;
    if (pi - 0.5).abs() >= 2.0 / nf.sqrt() {
        return Evaluation::new(
            name,
            Some(0.0),
            0.0,
            format!("Frequency pre-test failed: proportion={pi:.4}"),
        );
    }
    let observed = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count();
    let spread = pi * (1.0 - pi);
    let z = (observed as f64 - 2.0 * nf * spread).abs() / (2.0 * (2.0 * nf).sqrt() * spread);
    let p = erfc(z / std::f64::consts::SQRT_2);
    Evaluation::new(
        name,
        Some(p),
        z,
        format!("runs={observed}, expected={:.0}", 2.0 * nf * spread + 1.0),
    )
}

/// Longest run of ones in 8-bit blocks, binned as `<=1`, `2`, `3`, `>=4`.
const LONGEST_RUN_PROBABILITIES: [f64; 4] = [0.2148, 0.3672, 0.2305, 0.1875];

/// Distribution of the longest run of ones within 8-bit blocks.
pub fn longest_run_of_ones(sample: &Sample<'_>) -> Evaluation {
    let name = "Longest Run of Ones";
    let n = sample.bit_len();
    if n < 128 {
        return Evaluation::insufficient(name, 128, n);
    }
    let mut observed = [0u64; 4];
    let mut blocks = 0usize;
    for block in sample.bits().chunks_exact(8) {
        let longest = block
            .split(|&b| b == 0)
            .map(<[u8]>::len)
            .max()
            .unwrap_or(0);
        observed[longest.clamp(1, 4) - 1] += 1;
        blocks += 1;
    }
    let chi2: f64 = observed
        .iter()
        .zip(LONGEST_RUN_PROBABILITIES)
        .map(|(&count, probability)| {
            let expected = probability * blocks as f64;
            let diff = count as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = chi_squared_sf(3.0, chi2);
    Evaluation::new(name, p, chi2, format!("blocks={blocks}, M=8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_alternating_fails() {
        // 0101... has the maximum number of runs.
        let data = [0x55u8; 128];
        let eval = runs(&Sample::new(&data));
        assert!(eval.p_value.is_some());
        assert!(!eval.passed(0.01));
    }

    #[test]
    fn test_runs_pretest() {
        let data = [0xFFu8; 128];
        let eval = runs(&Sample::new(&data));
        assert_eq!(eval.p_value, Some(0.0));
        assert!(eval.details.contains("pre-test"));
    }

    #[test]
    fn test_longest_run_bins() {
        // 0xF0: a run of four in every block.
        let data = [0xF0u8; 64];
        let eval = longest_run_of_ones(&Sample::new(&data));
        assert!(!eval.passed(0.01));
        let short = longest_run_of_ones(&Sample::new(&[0u8; 8]));
        assert!(short.p_value.is_none());
    }
}
