//! Random walk tests.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::Evaluation;
use crate::sample::Sample;

/// Largest excursion of the ±1 walk, walked forward and backward. Reports
/// the smaller p-value.
pub fn cumulative_sums(sample: &Sample<'_>) -> Evaluation {
    let name = "Cumulative Sums";
    let bits = sample.bits();
    let n = bits.len();
    if n < 100 {
        return Evaluation::insufficient(name, 100, n);
    }
    let forward = max_excursion(bits.iter());
    let backward = max_excursion(bits.iter().rev());
    let p = cusum_p_value(n, forward).min(cusum_p_value(n, backward));
    Evaluation::new(
        name,
        Some(p),
        forward.max(backward) as f64,
        format!("max|S| forward={forward}, backward={backward}, n={n}"),
    )
}

fn max_excursion<'a>(bits: impl Iterator<Item = &'a u8>) -> u64 {
    let mut sum = 0i64;
    let mut max = 0u64;
    for &bit in bits {
        sum += if bit == 1 { 1 } else { -1 };
        max = max.max(sum.unsigned_abs());
    }
    max
}

fn cusum_p_value(n: usize, z: u64) -> f64 {
    if z == 0 {
        return 1.0;
    }
    let normal = Normal::standard();
    let nf = n as f64;
    let z = z as f64;
    let root = nf.sqrt();
    let term = |k: i64, hi: f64, lo: f64| {
        let k = k as f64;
        normal.cdf((4.0 * k + hi) * z / root) - normal.cdf((4.0 * k + lo) * z / root)
    };

    let first: f64 = (((-nf / z + 1.0) / 4.0).floor() as i64..=((nf / z - 1.0) / 4.0).floor() as i64)
        .map(|k| term(k, 1.0, -1.0))
        .sum();
    let second: f64 = (((-nf / z - 3.0) / 4.0).floor() as i64..=((nf / z - 1.0) / 4.0).floor() as i64)
        .map(|k| term(k, 3.0, 1.0))
        .sum();
    (1.0 - first + second).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excursion() {
        assert_eq!(max_excursion([1u8, 1, 0, 1].iter()), 2);
        assert_eq!(max_excursion([0u8, 0, 0].iter()), 3);
    }

    #[test]
    fn test_biased_walk_fails() {
        let eval = cumulative_sums(&Sample::new(&[0xFFu8; 64]));
        assert!(!eval.passed(0.01));
    }

    #[test]
    fn test_balanced_walk_passes() {
        // 0x55 keeps the walk within one step of zero.
        let eval = cumulative_sums(&Sample::new(&[0x55u8; 64]));
        assert!(eval.passed(0.01));
    }
}
