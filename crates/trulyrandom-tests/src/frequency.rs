//! Frequency tests: overall, per-block and per-byte-value balance.

use statrs::function::erf::erfc;

use crate::sample::Sample;
use crate::{Evaluation, chi_squared_sf};

const BLOCK_BITS: usize = 128;

/// Proportion of ones over the whole sample should be close to 1/2.
pub fn monobit(sample: &Sample<'_>) -> Evaluation {
    let name = "Monobit Frequency";
    let n = sample.bit_len();
    if n < 100 {
        return Evaluation::insufficient(name, 100, n);
    }
    let sum = 2 * sample.ones() as i64 - n as i64;
    let s_obs = sum.unsigned_abs() as f64 / (n as f64).sqrt();
    let p = erfc(s_obs / std::f64::consts::SQRT_2);
    Evaluation::new(name, Some(p), s_obs, format!("S={sum}, n={n}"))
}

/// Proportion of ones within each 128-bit block.
pub fn block_frequency(sample: &Sample<'_>) -> Evaluation {
    let name = "Block Frequency";
    let n = sample.bit_len();
    let blocks = n / BLOCK_BITS;
    if blocks < 10 {
        return Evaluation::insufficient(name, BLOCK_BITS * 10, n);
    }
    let chi2 = 4.0
        * BLOCK_BITS as f64
        * sample
            .bits()
            .chunks_exact(BLOCK_BITS)
            .map(|block| {
                let ones = block.iter().filter(|&&b| b == 1).count();
                let deviation = ones as f64 / BLOCK_BITS as f64 - 0.5;
                deviation * deviation
            })
            .sum::<f64>();
    let p = chi_squared_sf(blocks as f64, chi2);
    Evaluation::new(name, p, chi2, format!("blocks={blocks}, M={BLOCK_BITS}"))
}

/// Chi-squared goodness of fit of byte values against uniform.
pub fn byte_frequency(sample: &Sample<'_>) -> Evaluation {
    let name = "Byte Frequency";
    let bytes = sample.bytes();
    if bytes.len() < 256 {
        return Evaluation::insufficient(name, 256 * 8, sample.bit_len());
    }
    let mut histogram = [0u64; 256];
    for &b in bytes {
        histogram[b as usize] += 1;
    }
    let expected = bytes.len() as f64 / 256.0;
    let chi2: f64 = histogram
        .iter()
        .map(|&count| {
            let diff = count as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = chi_squared_sf(255.0, chi2);
    Evaluation::new(
        name,
        p,
        chi2,
        format!("n={}, expected_per_bin={expected:.1}", bytes.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monobit_balanced() {
        let data = [0x55u8; 64];
        let eval = monobit(&Sample::new(&data));
        assert_eq!(eval.statistic, 0.0);
        assert!((eval.p_value.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_monobit_all_ones_fails() {
        let data = [0xFFu8; 64];
        assert!(!monobit(&Sample::new(&data)).passed(0.01));
    }

    #[test]
    fn test_block_frequency_needs_ten_blocks() {
        let data = [0x55u8; 100];
        let eval = block_frequency(&Sample::new(&data));
        assert!(eval.p_value.is_none());
    }

    #[test]
    fn test_byte_frequency_uniform() {
        let data: Vec<u8> = (0..=255).cycle().take(256 * 8).collect();
        let eval = byte_frequency(&Sample::new(&data));
        assert_eq!(eval.statistic, 0.0);
        assert!(eval.passed(0.01));
    }

    #[test]
    fn test_byte_frequency_constant_fails() {
        let data = [7u8; 1024];
        assert!(!byte_frequency(&Sample::new(&data)).passed(0.01));
    }
}
