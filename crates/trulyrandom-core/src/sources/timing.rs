//! Clock phase noise.
//!
//! **Raw output characteristics:** LSBs of timing deltas. Low entropy per
//! byte and visibly biased; meant to be fed through extractors.

use std::time::{Instant, SystemTime};

use crate::source::{EntropySource, SourceCategory, SourceInfo};

const DEFAULT_SAMPLES_PER_READ: usize = 4096;

/// Measures phase noise between two independent clock oscillators
/// (`Instant` vs `SystemTime`). Thermal noise in each PLL causes random
/// frequency drift; the LSBs of their difference carry it.
#[derive(Debug, Clone)]
pub struct ClockJitterSource {
    samples_per_read: usize,
}

impl ClockJitterSource {
    pub fn new(samples_per_read: usize) -> Self {
        Self {
            samples_per_read: samples_per_read.max(1),
        }
    }
}

impl Default for ClockJitterSource {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES_PER_READ)
    }
}

static CLOCK_JITTER_INFO: SourceInfo = SourceInfo {
    name: "clock_jitter",
    description: "Phase noise between Instant and SystemTime clocks",
    physics: "Each clock is driven by a separate PLL. Thermal noise in the \
              voltage-controlled oscillator causes random frequency drift, \
              visible in the LSBs of their difference.",
    category: SourceCategory::Timing,
    entropy_rate_estimate: 0.5,
};

impl EntropySource for ClockJitterSource {
    fn info(&self) -> &SourceInfo {
        &CLOCK_JITTER_INFO
    }

    fn is_available(&self) -> bool {
        true
    }

    fn read_available_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.samples_per_read);

        for _ in 0..self.samples_per_read {
            let mono = Instant::now();
            let wall = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default();

            let mono_delta_ns = mono.elapsed().as_nanos() as u64;
            let wall_ns = wall.as_nanos() as u64;

            output.push((mono_delta_ns ^ wall_ns) as u8);
        }

        output
    }
}
