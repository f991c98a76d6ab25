//! Fisher–Yates block shuffle driven by the batch itself.
//!
//! The head of each batch is consumed as a bit stream (XORed with the seed)
//! and turned into uniform indices by a Fast Dice Roller. Those indices
//! permute the whole blocks of the remainder, which form the output. The
//! bits spent on indices are discarded.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::extractor::{BatchContext, Extractor, SeededTransform, Transform};

const DEFAULT_BLOCK_SIZE: usize = 3;

#[derive(Debug)]
pub struct Shuffle {
    block_size: AtomicUsize,
}

impl Default for Shuffle {
    fn default() -> Self {
        Self {
            block_size: AtomicUsize::new(DEFAULT_BLOCK_SIZE),
        }
    }
}

impl Transform for Shuffle {
    const NAME: &'static str = "shuffle-extractor";
    const SEEDED: bool = true;

    fn default_batch_size(&self) -> usize {
        2_000_000
    }

    fn process(&self, data: &[u8], ctx: &BatchContext<'_>) -> Vec<u8> {
        shuffle_blocks(data, self.block_size.load(Ordering::Acquire), ctx.seed)
    }
}

impl SeededTransform for Shuffle {}

impl Extractor<Shuffle> {
    /// Bytes moved together as one unit.
    pub fn block_size(&self) -> usize {
        self.transform().block_size.load(Ordering::Acquire)
    }

    /// Small sizes coprime with the next stage's block size work best.
    pub fn set_block_size(&self, size: usize) -> Result<()> {
        if size < 1 {
            return Err(Error::config("Block size should be >= 1"));
        }
        self.transform().block_size.store(size, Ordering::Release);
        Ok(())
    }
}

/// LSB-first bits of `data`, each XORed with the seed byte at the same
/// position (cycling through the seed).
struct SeededBits<'a> {
    data: &'a [u8],
    seed: &'a [u8],
    cursor: usize,
}

impl<'a> SeededBits<'a> {
    fn new(data: &'a [u8], seed: &'a [u8]) -> Self {
        Self {
            data,
            seed,
            cursor: 0,
        }
    }

    /// Bytes of `data` from which at least one bit was taken.
    fn bytes_touched(&self) -> usize {
        self.cursor.div_ceil(8)
    }
}

impl Iterator for SeededBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let byte_index = self.cursor / 8;
        let mut byte = *self.data.get(byte_index)?;
        if !self.seed.is_empty() {
            byte ^= self.seed[byte_index % self.seed.len()];
        }
        let bit = (byte >> (self.cursor % 8)) & 1;
        self.cursor += 1;
        Some(bit as usize)
    }
}

/// Uniform integer in `[0, bound)` from fair bits (Lumbroso's Fast Dice
/// Roller). `None` once the bits run out.
fn fast_dice_roll(bits: &mut SeededBits<'_>, bound: usize) -> Option<usize> {
    let mut v = 1usize;
    let mut c = 0usize;
    loop {
        v <<= 1;
        c = (c << 1) | bits.next()?;
        if v >= bound {
            if c < bound {
                return Some(c);
            }
            v -= bound;
            c -= bound;
        }
    }
}

/// Shuffle whole `block_size` blocks of the tail of `data`, using its head
/// as the randomness. Returns an empty vector when the batch is too short to
/// leave at least two blocks.
pub fn shuffle_blocks(data: &[u8], block_size: usize, seed: &[u8]) -> Vec<u8> {
    let block = block_size.max(1);
    let mut bits = SeededBits::new(data, seed);
    // positions[i] is the Fisher–Yates swap target for block i, in [0, i].
    let mut positions = vec![0usize];

    let leftover = loop {
        if let Some(position) = fast_dice_roll(&mut bits, positions.len() + 1) {
            positions.push(position);
        }
        let leftover = data.len() - bits.bytes_touched();
        if leftover < block * 2 {
            return Vec::new();
        }
        if leftover / block <= positions.len() {
            break leftover;
        }
    };

    let count = leftover / block;
    let start = data.len() - count * block;

    // Resolve final positions first (inside-out Fisher–Yates) so every block
    // is copied once.
    let mut map = vec![0usize; count];
    for (i, &position) in positions.iter().take(count).enumerate() {
        if i != position {
            map[i] = map[position];
        }
        map[position] = i;
    }

    let mut out = vec![0u8; count * block];
    for (i, &target) in map.iter().enumerate() {
        let src = start + i * block;
        out[target * block..(target + 1) * block].copy_from_slice(&data[src..src + block]);
    }
    out
}
