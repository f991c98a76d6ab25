//! Input shared by all tests of one batch.

/// A batch as bytes and as unpacked bits (MSB first per byte).
///
/// Unpacked once per batch and reused by every bit-level test.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    bytes: &'a [u8],
    bits: Vec<u8>,
}

impl<'a> Sample<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let mut bits = Vec::with_capacity(bytes.len() * 8);
        for &byte in bytes {
            bits.extend((0..8).rev().map(|shift| (byte >> shift) & 1));
        }
        Self { bytes, bits }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// One element per bit, each 0 or 1.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    pub fn ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b == 1).count()
    }
}

/// Occurrences of every `m`-bit pattern over all `n` overlapping windows,
/// wrapping around the end of `bits`. Index is the pattern value.
pub(crate) fn pattern_counts(bits: &[u8], m: usize) -> Vec<u64> {
    let n = bits.len();
    let mut counts = vec![0u64; 1 << m];
    if m == 0 || n == 0 {
        counts[0] = n as u64;
        return counts;
    }
    let mask = (1usize << m) - 1;
    let mut value = 0usize;
    for i in 0..m - 1 {
        value = (value << 1) | bits[i % n] as usize;
    }
    for i in 0..n {
        value = ((value << 1) | bits[(i + m - 1) % n] as usize) & mask;
        counts[value] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpacks_msb_first() {
        let sample = Sample::new(&[0b1011_0001]);
        assert_eq!(sample.bits(), &[1, 0, 1, 1, 0, 0, 0, 1]);
        assert_eq!(sample.ones(), 4);
        assert_eq!(sample.bit_len(), 8);
    }

    #[test]
    fn test_pattern_counts_wrap() {
        // 0011 read circularly: 00, 01, 11, 10.
        let counts = pattern_counts(&[0, 0, 1, 1], 2);
        assert_eq!(counts, vec![1, 1, 1, 1]);
        let counts = pattern_counts(&[0, 0, 1, 1], 3);
        assert_eq!(counts.iter().sum::<u64>(), 4);
        assert_eq!(counts[0b001], 1);
        assert_eq!(counts[0b100], 1);
    }

    #[test]
    fn test_pattern_counts_zero_length() {
        assert_eq!(pattern_counts(&[1, 0, 1], 0), vec![3]);
    }
}
