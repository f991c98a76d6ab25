//! Throughput and entropy telemetry of a module.
//!
//! Each collection has its own lock, separate from the output buffer lock,
//! so statistics never contend with data movement. Lock order where two are
//! taken together: `history` before `intervals`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{
    BPS_MIN_SAMPLES, BPS_WINDOW, ENTROPY_PERIOD, ENTROPY_WINDOW_BYTES, TICK_PERIOD,
};
use crate::lock;

/// Gaps between two activity intervals shorter than this are merged.
const MERGE_GAP: Duration = Duration::from_millis(1);

/// `f64` stored as bits in an `AtomicU64`.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// A period during which the module was allowed to run. `end == None` while
/// the period is still open.
#[derive(Debug, Clone, Copy)]
struct Interval {
    start: Instant,
    end: Option<Instant>,
}

#[derive(Debug, Default)]
struct EntropyWindow {
    bytes: VecDeque<u8>,
    last_added: Option<Instant>,
    last_calculated: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct Statistics {
    history: Mutex<VecDeque<(u64, Instant)>>,
    intervals: Mutex<Vec<Interval>>,
    window: Mutex<EntropyWindow>,
    bytes_per_second: AtomicU64,
    bytes_per_second_incl_pause: AtomicU64,
    entropy: AtomicF64,
    calculate_entropy: AtomicBool,
    calculate_bps: AtomicBool,
}

impl Statistics {
    pub(crate) fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            intervals: Mutex::new(Vec::new()),
            window: Mutex::new(EntropyWindow::default()),
            bytes_per_second: AtomicU64::new(0),
            bytes_per_second_incl_pause: AtomicU64::new(0),
            entropy: AtomicF64::new(0.0),
            calculate_entropy: AtomicBool::new(false),
            calculate_bps: AtomicBool::new(true),
        }
    }

    pub(crate) fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Acquire)
    }

    pub(crate) fn bytes_per_second_incl_pause(&self) -> u64 {
        self.bytes_per_second_incl_pause.load(Ordering::Acquire)
    }

    pub(crate) fn entropy(&self) -> f64 {
        self.entropy.load()
    }

    pub(crate) fn calculate_entropy(&self) -> bool {
        self.calculate_entropy.load(Ordering::Acquire)
    }

    pub(crate) fn set_calculate_entropy(&self, enabled: bool) {
        if self.calculate_entropy.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if !enabled {
            let mut window = lock(&self.window);
            window.bytes.clear();
            window.last_added = None;
            window.last_calculated = None;
        }
        self.entropy.store(0.0);
    }

    pub(crate) fn calculate_bps(&self) -> bool {
        self.calculate_bps.load(Ordering::Acquire)
    }

    pub(crate) fn set_calculate_bps(&self, enabled: bool) {
        if self.calculate_bps.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if !enabled {
            lock(&self.history).clear();
        }
        self.bytes_per_second.store(0, Ordering::Release);
        self.bytes_per_second_incl_pause.store(0, Ordering::Release);
    }

    /// Feed freshly buffered bytes into the entropy window.
    pub(crate) fn record_bytes(&self, data: &[u8]) {
        if !self.calculate_entropy() {
            return;
        }
        let mut window = lock(&self.window);
        let keep = data.len().min(ENTROPY_WINDOW_BYTES);
        window.bytes.extend(&data[data.len() - keep..]);
        let excess = window.bytes.len().saturating_sub(ENTROPY_WINDOW_BYTES);
        window.bytes.drain(..excess);
        window.last_added = Some(Instant::now());
    }

    /// Open a new activity interval (or reopen the last one when it closed
    /// only a moment ago).
    pub(crate) fn activity_started(&self, total_bytes: u64, now: Instant) {
        let mut history = lock(&self.history);
        push_sample(&mut history, total_bytes, now);
        let mut intervals = lock(&self.intervals);
        match intervals.last_mut() {
            Some(last) if last.end.is_some_and(|end| now.duration_since(end) < MERGE_GAP) => {
                last.end = None;
            }
            _ => intervals.push(Interval {
                start: now,
                end: None,
            }),
        }
    }

    /// Close the open activity interval and forget intervals that ended
    /// before the averaging window.
    pub(crate) fn activity_stopped(&self, now: Instant) {
        let mut intervals = lock(&self.intervals);
        if let Some(last) = intervals.last_mut() {
            last.end.get_or_insert(now);
        }
        while intervals.len() > 1 && now.duration_since(intervals[1].start) > BPS_WINDOW {
            intervals.remove(0);
        }
    }

    /// Periodic recomputation, driven by the shared scheduler.
    pub(crate) fn tick(&self, total_bytes: u64, now: Instant) {
        if self.calculate_bps() {
            self.update_rate_incl_pause(total_bytes, now);
            self.update_rate(total_bytes, now);
        }
        if self.calculate_entropy() && self.entropy_due() {
            self.refresh_entropy();
        }
    }

    /// Recompute the entropy of the trailing window right now.
    pub(crate) fn refresh_entropy(&self) {
        let mut window = lock(&self.window);
        let entropy = normalized_entropy(window.bytes.make_contiguous());
        self.entropy.store(entropy);
        window.last_calculated = Some(Instant::now());
    }

    /// Forget counters-derived state.
    pub(crate) fn reset(&self, total_bytes: u64, running: bool) {
        let now = Instant::now();
        let mut history = lock(&self.history);
        history.clear();
        let mut intervals = lock(&self.intervals);
        intervals.clear();
        if running {
            push_sample(&mut history, total_bytes, now);
            intervals.push(Interval {
                start: now,
                end: None,
            });
        }
        drop(intervals);
        drop(history);
        let mut window = lock(&self.window);
        window.bytes.clear();
        window.last_added = None;
        window.last_calculated = None;
        self.bytes_per_second.store(0, Ordering::Release);
        self.bytes_per_second_incl_pause.store(0, Ordering::Release);
        self.entropy.store(0.0);
    }

    fn entropy_due(&self) -> bool {
        let window = lock(&self.window);
        match window.last_calculated {
            None => true,
            Some(calculated) => {
                window.last_added.is_some_and(|added| calculated <= added)
                    && calculated.elapsed() >= ENTROPY_PERIOD
            }
        }
    }

    fn update_rate_incl_pause(&self, total_bytes: u64, now: Instant) {
        let mut history = lock(&self.history);
        push_sample(&mut history, total_bytes, now);
        if history.len() < BPS_MIN_SAMPLES {
            return;
        }
        if let Some(&(first_bytes, first_time)) = history.front() {
            let elapsed = now.duration_since(first_time).as_secs_f64();
            if elapsed > 0.0 {
                let rate = total_bytes.saturating_sub(first_bytes) as f64 / elapsed;
                self.bytes_per_second_incl_pause
                    .store(rate as u64, Ordering::Release);
            }
        }
    }

    /// Rate over the time actually spent running inside the sample window.
    fn update_rate(&self, total_bytes: u64, now: Instant) {
        let history = lock(&self.history);
        let intervals = lock(&self.intervals);
        let (Some(&(_, first_time)), Some(first_interval)) = (history.front(), intervals.first())
        else {
            return;
        };
        let window_start = first_interval.start.max(first_time);
        let bytes_at_start = history
            .iter()
            .find(|(_, time)| *time >= window_start)
            .map_or(total_bytes, |&(bytes, _)| bytes);

        let active: Duration = intervals
            .iter()
            .map(|interval| {
                let end = interval.end.unwrap_or(now).min(now);
                end.saturating_duration_since(interval.start.max(window_start))
            })
            .sum();

        let rate = if active.is_zero() {
            0
        } else {
            (total_bytes.saturating_sub(bytes_at_start) as f64 / active.as_secs_f64()) as u64
        };
        self.bytes_per_second.store(rate, Ordering::Release);
    }
}

fn push_sample(history: &mut VecDeque<(u64, Instant)>, total_bytes: u64, now: Instant) {
    let cap = (BPS_WINDOW.as_millis() / TICK_PERIOD.as_millis()).max(1) as usize;
    history.push_back((total_bytes, now));
    while history.len() > cap {
        history.pop_front();
    }
}

/// Shannon entropy in bits/byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let n = data.len() as f64;
    let mut h = 0.0;
    for &c in &counts {
        if c > 0 {
            let p = c as f64 / n;
            h -= p * p.log2();
        }
    }
    h
}

/// Order-0 Shannon entropy with base-256 logarithm, so the result lies in
/// `[0, 1]`: 0 for constant data, 1 when all 256 values are equally frequent.
pub fn normalized_entropy(data: &[u8]) -> f64 {
    shannon_entropy(data) / 8.0
}
