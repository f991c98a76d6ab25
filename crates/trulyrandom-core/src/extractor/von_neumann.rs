//! Von Neumann debiasing.

use crate::extractor::{BatchContext, Transform};

/// Bit pairs `01 → 0`, `10 → 1`; `00` and `11` are discarded. Nominally 2:1
/// on i.i.d. input, much more on biased input, so the reported compression
/// is the observed one.
#[derive(Debug, Default, Clone, Copy)]
pub struct VonNeumann;

impl Transform for VonNeumann {
    const NAME: &'static str = "von-neumann-extractor";

    fn default_batch_size(&self) -> usize {
        1_000
    }

    fn process(&self, data: &[u8], _ctx: &BatchContext<'_>) -> Vec<u8> {
        von_neumann_debias(data)
    }
}

/// Debias `data`. Bits are read and packed LSB-first within each byte; pairs
/// never straddle a byte. A trailing partial output byte is dropped.
pub fn von_neumann_debias(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4);
    let mut acc = 0u8;
    let mut filled = 0;
    for &byte in data {
        for i in (0..8).step_by(2) {
            let b1 = (byte >> i) & 1;
            let b2 = (byte >> (i + 1)) & 1;
            if b1 != b2 {
                acc |= b1 << filled;
                filled += 1;
                if filled == 8 {
                    out.push(acc);
                    acc = 0;
                    filled = 0;
                }
            }
        }
    }
    out
}
