//! SHA-2 block compression.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};
use crate::extractor::{BatchContext, Extractor, Transform, batch_multiplier};
use crate::lock;

const DEFAULT_INPUT_BLOCK_SIZE: usize = 128;

/// Digest applied to each input block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashFunction {
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl HashFunction {
    /// Digest length in bytes.
    pub fn output_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha384 => write!(f, "sha384"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Hashes fixed-size input blocks. Batches follow the usual pressure tiers,
/// rounded to whole blocks so no input is left undigested.
#[derive(Debug)]
pub struct HashCompressor {
    function: Mutex<HashFunction>,
    input_block_size: AtomicUsize,
}

impl Default for HashCompressor {
    fn default() -> Self {
        Self {
            function: Mutex::new(HashFunction::default()),
            input_block_size: AtomicUsize::new(DEFAULT_INPUT_BLOCK_SIZE),
        }
    }
}

impl HashCompressor {
    fn function(&self) -> HashFunction {
        *lock(&self.function)
    }

    fn block(&self) -> usize {
        self.input_block_size.load(Ordering::Acquire).max(1)
    }
}

impl Transform for HashCompressor {
    const NAME: &'static str = "hash-extractor";

    fn default_batch_size(&self) -> usize {
        DEFAULT_INPUT_BLOCK_SIZE * 1_000
    }

    fn actual_batch_size(&self, batch_size: usize, dynamic_coefficient: f64, max: usize) -> usize {
        let block = self.block();
        let scaled = batch_size.saturating_mul(batch_multiplier(dynamic_coefficient));
        let rounded = scaled.div_ceil(block).saturating_mul(block);
        // A cap below one block still pulls a whole block.
        let cap = (max / block).max(1).saturating_mul(block);
        rounded.min(cap)
    }

    fn process(&self, data: &[u8], _ctx: &BatchContext<'_>) -> Vec<u8> {
        let function = self.function();
        let block = self.block();
        let mut out = Vec::with_capacity(data.len() / block * function.output_size());
        for chunk in data.chunks_exact(block) {
            out.extend_from_slice(&function.digest(chunk));
        }
        out
    }

    fn nominal_compression(&self, _dynamic_coefficient: f64) -> Option<f64> {
        Some(self.block() as f64 / self.function().output_size() as f64)
    }
}

impl Extractor<HashCompressor> {
    pub fn hash_function(&self) -> HashFunction {
        self.transform().function()
    }

    pub fn set_hash_function(&self, function: HashFunction) {
        *lock(&self.transform().function) = function;
    }

    /// Bytes hashed into one digest.
    pub fn input_block_size(&self) -> usize {
        self.transform().input_block_size.load(Ordering::Acquire)
    }

    pub fn set_input_block_size(&self, size: usize) -> Result<()> {
        if size < 1 {
            return Err(Error::config("Input block size should be >= 1"));
        }
        self.transform()
            .input_block_size
            .store(size, Ordering::Release);
        Ok(())
    }
}
