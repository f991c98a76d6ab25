//! Overlapping pattern tests.

use crate::sample::{Sample, pattern_counts};
use crate::{Evaluation, chi_squared_sf};

const SERIAL_PATTERN_BITS: usize = 4;
const APEN_PATTERN_BITS: usize = 3;

fn psi_squared(bits: &[u8], m: usize) -> f64 {
    if m == 0 {
        return 0.0;
    }
    let n = bits.len() as f64;
    let sum_sq: f64 = pattern_counts(bits, m)
        .iter()
        .map(|&c| (c as f64) * (c as f64))
        .sum();
    sum_sq * (1u64 << m) as f64 / n - n
}

/// Uniformity of all overlapping 4-bit patterns. Reports the smaller of the
/// first and second difference p-values.
pub fn serial(sample: &Sample<'_>) -> Evaluation {
    let name = "Serial";
    let m = SERIAL_PATTERN_BITS;
    let bits = sample.bits();
    let needed = (1 << m) + 10;
    if bits.len() < needed {
        return Evaluation::insufficient(name, needed, bits.len());
    }
    let psi_m = psi_squared(bits, m);
    let psi_m1 = psi_squared(bits, m - 1);
    let psi_m2 = psi_squared(bits, m - 2);
    let delta1 = psi_m - psi_m1;
    let delta2 = psi_m - 2.0 * psi_m1 + psi_m2;

    let p1 = chi_squared_sf((1u64 << (m - 1)) as f64, delta1);
    let p2 = chi_squared_sf((1u64 << (m - 2)) as f64, delta2);
    let p = p1.zip(p2).map(|(a, b)| a.min(b));
    Evaluation::new(
        name,
        p,
        delta1,
        format!("m={m}, delta2={delta2:.3}, n_bits={}", bits.len()),
    )
}

/// Frequencies of overlapping 3- and 4-bit patterns compared through their
/// entropies.
pub fn approximate_entropy(sample: &Sample<'_>) -> Evaluation {
    let name = "Approximate Entropy";
    let m = APEN_PATTERN_BITS;
    let bits = sample.bits();
    if bits.len() < 64 {
        return Evaluation::insufficient(name, 64, bits.len());
    }
    let n = bits.len() as f64;
    let phi = |block: usize| -> f64 {
        pattern_counts(bits, block)
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                p * p.ln()
            })
            .sum()
    };
    let apen = phi(m) - phi(m + 1);
    let chi2 = 2.0 * n * (std::f64::consts::LN_2 - apen);
    let p = chi_squared_sf((1u64 << m) as f64, chi2);
    Evaluation::new(name, p, chi2, format!("ApEn={apen:.6}, m={m}"))
}
