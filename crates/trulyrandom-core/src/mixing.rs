//! Upstream source bookkeeping and multi-source mixing.
//!
//! A module may pull from several upstream modules. With mixing enabled the
//! contribution of each source is taken in proportion to what it currently
//! holds and the parts are interleaved so that each source's bytes are spread
//! evenly across the output. With mixing disabled sources are drained one at
//! a time and their bytes stay contiguous.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::module::Module;
use crate::{lock, read_lock, write_lock};

#[derive(Debug)]
pub(crate) struct SourceSet {
    sources: RwLock<Vec<Weak<Module>>>,
    mix: AtomicBool,
    /// Bytes pulled for an exact request that a competing reader cut short.
    carry: Mutex<Vec<u8>>,
}

impl SourceSet {
    pub(crate) fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            mix: AtomicBool::new(true),
            carry: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn mix(&self) -> bool {
        self.mix.load(Ordering::Acquire)
    }

    pub(crate) fn set_mix(&self, mix: bool) {
        self.mix.store(mix, Ordering::Release);
    }

    /// Register `source`. Returns `false` if it was already registered.
    pub(crate) fn add(&self, source: &Arc<Module>) -> bool {
        let mut sources = write_lock(&self.sources);
        sources.retain(|s| s.strong_count() > 0);
        if sources.iter().any(|s| std::ptr::eq(s.as_ptr(), Arc::as_ptr(source))) {
            return false;
        }
        sources.push(Arc::downgrade(source));
        true
    }

    pub(crate) fn remove(&self, source: &Arc<Module>) -> bool {
        let mut sources = write_lock(&self.sources);
        let before = sources.len();
        sources.retain(|s| !std::ptr::eq(s.as_ptr(), Arc::as_ptr(source)));
        sources.len() != before
    }

    /// Live sources, highest priority first (registration order on ties).
    pub(crate) fn live(&self) -> Vec<Arc<Module>> {
        let mut live: Vec<Arc<Module>> = read_lock(&self.sources)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        live.sort_by_key(|m| Reverse(m.priority()));
        live
    }

    /// Bytes currently obtainable from all sources.
    pub(crate) fn available(&self) -> usize {
        lock(&self.carry).len() + self.live().iter().map(|s| s.bytes_in_buffer()).sum::<usize>()
    }

    /// Pull exactly `count` bytes, or nothing if the sources hold too little.
    pub(crate) fn pull_exactly(&self, count: usize) -> Option<Vec<u8>> {
        let mut carry = lock(&self.carry);
        if carry.len() < count {
            let need = count - carry.len();
            let sources = self.live();
            let available: usize = sources.iter().map(|s| s.bytes_in_buffer()).sum();
            if available < need {
                return None;
            }
            let gathered = if self.mix() {
                gather_mixed(&sources, need)
            } else {
                gather_sequential(&sources, need)
            };
            carry.extend_from_slice(&gathered);
            if carry.len() < count {
                return None;
            }
        }
        let rest = carry.split_off(count);
        Some(std::mem::replace(&mut *carry, rest))
    }

    /// Pull whatever is available, at most `limit` bytes. Without mixing only
    /// the first source holding data is read.
    pub(crate) fn pull_available(&self, limit: usize) -> Vec<u8> {
        let mut out = {
            let mut carry = lock(&self.carry);
            let take = carry.len().min(limit);
            carry.drain(..take).collect::<Vec<u8>>()
        };
        let limit = limit - out.len();
        if limit == 0 {
            return out;
        }
        let sources = self.live();
        if self.mix() {
            let available: usize = sources.iter().map(|s| s.bytes_in_buffer()).sum();
            let need = available.min(limit);
            if need > 0 {
                out.extend(gather_mixed(&sources, need));
            }
        } else if let Some(source) = sources.iter().find(|s| s.bytes_in_buffer() > 0) {
            out.extend(source.read_up_to(limit));
        }
        out
    }
}

/// Take `need` bytes split across `sources` in proportion to their current
/// occupancy and interleave the parts.
fn gather_mixed(sources: &[Arc<Module>], need: usize) -> Vec<u8> {
    let available: Vec<usize> = sources.iter().map(|s| s.bytes_in_buffer()).collect();
    let shares = proportional_shares(&available, need);
    let parts: Vec<Vec<u8>> = sources
        .iter()
        .zip(&shares)
        .map(|(source, &share)| {
            if share == 0 {
                Vec::new()
            } else {
                source.read_exactly(share)
            }
        })
        .collect();
    interleave(&parts)
}

fn gather_sequential(sources: &[Arc<Module>], need: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(need);
    for source in sources {
        let remaining = need - out.len();
        if remaining == 0 {
            break;
        }
        out.extend(source.read_up_to(remaining));
    }
    out
}

/// Split `need` across sources proportionally to `available`, handing the
/// rounding remainder to sources in order while they have room.
pub(crate) fn proportional_shares(available: &[usize], need: usize) -> Vec<usize> {
    let total: usize = available.iter().sum();
    let need = need.min(total);
    if total == 0 {
        return vec![0; available.len()];
    }
    let mut shares: Vec<usize> = available
        .iter()
        .map(|&a| (a as u128 * need as u128 / total as u128) as usize)
        .collect();
    let mut missing = need - shares.iter().sum::<usize>();
    for (share, &a) in shares.iter_mut().zip(available) {
        if missing == 0 {
            break;
        }
        let extra = (a - *share).min(missing);
        *share += extra;
        missing -= extra;
    }
    shares
}

/// Merge parts so that element `j` of a part of length `n` lands near
/// relative position `(j + 0.5) / n` of the output. Ties go to the earlier
/// part.
pub(crate) fn interleave(parts: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = parts.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut next = vec![0usize; parts.len()];
    for _ in 0..total {
        let mut best: Option<usize> = None;
        for (i, part) in parts.iter().enumerate() {
            if next[i] >= part.len() {
                continue;
            }
            best = match best {
                Some(b) if !precedes(next[i], part.len(), next[b], parts[b].len()) => Some(b),
                _ => Some(i),
            };
        }
        let Some(i) = best else { break };
        out.push(parts[i][next[i]]);
        next[i] += 1;
    }
    out
}

/// `(2a + 1) / 2la < (2b + 1) / 2lb` without floating point.
fn precedes(a: usize, la: usize, b: usize, lb: usize) -> bool {
    (2 * a as u128 + 1) * (lb as u128) < (2 * b as u128 + 1) * (la as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedes_compares_midpoints() {
        // 1/4 < 1/2 < 3/4
        assert!(precedes(0, 2, 0, 1));
        assert!(!precedes(0, 1, 0, 2));
        assert!(precedes(0, 1, 1, 2));
        // Equal positions do not precede each other.
        assert!(!precedes(0, 1, 1, 3));
        assert!(!precedes(1, 3, 0, 1));
        let big = u32::MAX as usize;
        assert!(precedes(big / 2, big, big - 1, big));
    }

    fn longest_run(data: &[u8], value: u8) -> usize {
        let mut longest = 0;
        let mut current = 0;
        for &b in data {
            if b == value {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }

    #[test]
    fn test_shares_sum_to_need() {
        let shares = proportional_shares(&[100, 57, 5], 162);
        assert_eq!(shares, vec![100, 57, 5]);
        let shares = proportional_shares(&[100, 57, 5], 50);
        assert_eq!(shares.iter().sum::<usize>(), 50);
        assert!(shares[0] > shares[1] && shares[1] >= shares[2]);
    }

    #[test]
    fn test_shares_empty_sources() {
        assert_eq!(proportional_shares(&[0, 0], 10), vec![0, 0]);
        assert_eq!(proportional_shares(&[], 10), Vec::<usize>::new());
    }

    #[test]
    fn test_interleave_spreads_sources() {
        let parts = vec![vec![0u8; 100], vec![1u8; 57], vec![2u8; 5]];
        let out = interleave(&parts);
        assert_eq!(out.len(), 162);
        assert_eq!(out.iter().filter(|&&b| b == 0).count(), 100);
        assert_eq!(out.iter().filter(|&&b| b == 1).count(), 57);
        assert_eq!(out.iter().filter(|&&b| b == 2).count(), 5);
        assert_eq!(longest_run(&out, 0), 2);
        assert_eq!(longest_run(&out, 1), 1);
        assert_eq!(longest_run(&out, 2), 1);
    }

    #[test]
    fn test_interleave_preserves_part_order() {
        let parts = vec![vec![1u8, 2, 3], vec![10u8, 20]];
        let out = interleave(&parts);
        let firsts: Vec<u8> = out.iter().copied().filter(|&b| b < 10).collect();
        let seconds: Vec<u8> = out.iter().copied().filter(|&b| b >= 10).collect();
        assert_eq!(firsts, vec![1, 2, 3]);
        assert_eq!(seconds, vec![10, 20]);
    }

    #[test]
    fn test_interleave_single_part_is_identity() {
        let parts = vec![vec![5u8, 6, 7]];
        assert_eq!(interleave(&parts), vec![5, 6, 7]);
        assert!(interleave(&[]).is_empty());
    }
}
