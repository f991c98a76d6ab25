//! The pipeline node.
//!
//! A [`Module`] owns an output [`RingBuffer`], a worker thread and a small
//! run-state machine:
//!
//! ```text
//! effective_run = manual_run && !overflow_paused
//! ```
//!
//! `start()`/`stop()` flip `manual_run`; backpressure flips
//! `overflow_paused` after every append and every read. Each edge of
//! `effective_run` opens or closes an activity interval and wakes or parks the
//! worker. What the worker actually does on each iteration is supplied by a
//! [`Stage`]: extractors pull from their sources and transform, device modules
//! poll hardware, testers run a battery.
//!
//! Modules live in an `Arc`. The worker and the statistics scheduler only hold
//! weak references, so dropping the last handle lets both go away on their
//! own. [`Module::dispose`] is the orderly way to shut a module down.

mod scheduler;
mod stats;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::{
    self, DEFAULT_BUFFER_SIZE, DEFAULT_OVERFLOW_HYSTERESIS, IDLE_SLEEP, ModuleConfig,
    PARK_TIMEOUT,
};
use crate::data_source::DataSource;
use crate::error::{Error, Result};
use crate::mixing::SourceSet;
use crate::ring_buffer::RingBuffer;
use crate::{lock, read_lock, write_lock};

pub use stats::{normalized_entropy, shannon_entropy};
pub(crate) use stats::AtomicF64;
use stats::Statistics;

/// Result of one worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Work was done; step again right away.
    Progress,
    /// Nothing to do; the worker sleeps briefly before the next step.
    Idle,
}

/// The behavior plugged into a [`Module`]'s worker.
pub trait Stage: Send + Sync + 'static {
    /// One unit of work. Called repeatedly while the module runs. A step that
    /// has started always completes, even when the module is stopped or
    /// disposed meanwhile.
    fn step(&self, module: &Module) -> StepOutcome;

    /// Called on every statistics tick, on the scheduler thread.
    fn periodic(&self, _module: &Module) {}
}

/// Anything that can be wired into a pipeline.
pub trait Node {
    fn module(&self) -> &Arc<Module>;
}

impl Node for Arc<Module> {
    fn module(&self) -> &Arc<Module> {
        self
    }
}

/// Observable run state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    OverflowPaused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::OverflowPaused => write!(f, "paused on overflow"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunFlags {
    manual_run: bool,
    overflow_paused: bool,
}

impl RunFlags {
    fn effective(self) -> bool {
        self.manual_run && !self.overflow_paused
    }

    fn state(self) -> RunState {
        match (self.manual_run, self.overflow_paused) {
            (false, _) => RunState::Stopped,
            (true, false) => RunState::Running,
            (true, true) => RunState::OverflowPaused,
        }
    }
}

/// A stage that never does anything. Data reaches a passive module only
/// through [`Module::add_data`].
struct Passive;

impl Stage for Passive {
    fn step(&self, _module: &Module) -> StepOutcome {
        StepOutcome::Idle
    }
}

pub struct Module {
    this: Weak<Module>,
    name: RwLock<String>,
    priority: AtomicI32,
    stage: Arc<dyn Stage>,

    buffer: Mutex<RingBuffer<u8>>,
    /// Mirror of the buffer length for lock-free pre-checks.
    buffered: AtomicUsize,
    capacity: AtomicUsize,
    total_bytes_generated: AtomicU64,

    pause_on_overflow: AtomicBool,
    overflow_hysteresis: AtomicF64,

    flags: Mutex<RunFlags>,
    wake: Condvar,
    should_stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    dispose_lock: Mutex<()>,
    disposed: AtomicBool,

    stats: Statistics,
    sources: SourceSet,
}

impl Module {
    /// Create a stopped module driven by `stage` and register it with the
    /// statistics scheduler.
    pub fn new(name: impl Into<String>, stage: Arc<dyn Stage>) -> Arc<Self> {
        let module = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name: RwLock::new(name.into()),
            priority: AtomicI32::new(0),
            stage,
            buffer: Mutex::new(RingBuffer::new(DEFAULT_BUFFER_SIZE)),
            buffered: AtomicUsize::new(0),
            capacity: AtomicUsize::new(DEFAULT_BUFFER_SIZE),
            total_bytes_generated: AtomicU64::new(0),
            pause_on_overflow: AtomicBool::new(true),
            overflow_hysteresis: AtomicF64::new(DEFAULT_OVERFLOW_HYSTERESIS),
            flags: Mutex::new(RunFlags::default()),
            wake: Condvar::new(),
            should_stop: AtomicBool::new(false),
            worker: Mutex::new(None),
            dispose_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
            stats: Statistics::new(),
            sources: SourceSet::new(),
        });
        scheduler::register(&module);
        module
    }

    /// A module without a worker stage, fed through [`Module::add_data`].
    pub fn passive(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, Arc::new(Passive))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Allow the worker to run. Has no effect once disposed.
    pub fn start(&self) {
        if self.should_stop.load(Ordering::Acquire) {
            log::debug!("module '{}' is disposed, start ignored", self.name());
            return;
        }
        self.update_flags(|flags| flags.manual_run = true);
    }

    /// Park the worker after its current step.
    pub fn stop(&self) {
        self.update_flags(|flags| flags.manual_run = false);
    }

    /// Whether the module was started by the user (it may still be paused on
    /// overflow).
    pub fn started(&self) -> bool {
        lock(&self.flags).manual_run
    }

    pub fn state(&self) -> RunState {
        lock(&self.flags).state()
    }

    /// Stop the module for good: unregister from the scheduler, stop the
    /// worker and wait for its in-flight step to finish. Idempotent.
    pub fn dispose(&self) {
        let _guard = lock(&self.dispose_lock);
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.should_stop.store(true, Ordering::Release);
        scheduler::unregister(self);
        self.update_flags(|flags| flags.manual_run = false);
        self.wake.notify_all();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            // A stage may dispose its own module; the loop exits on its own then.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("worker of module '{}' terminated abnormally", self.name());
            }
        }
        self.disposed.store(true, Ordering::Release);
        log::debug!("module '{}' disposed", self.name());
    }

    pub fn disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn name(&self) -> String {
        read_lock(&self.name).clone()
    }

    /// Rename the module. A worker that is already running keeps its thread
    /// name.
    pub fn set_name(&self, name: impl Into<String>) {
        *write_lock(&self.name) = name.into();
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    /// Higher-priority sources are read first by downstream modules.
    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Pull data from `source`. The link is weak: dropping `source` removes it.
    pub fn add_source(&self, source: &impl Node) -> Result<()> {
        let source = source.module();
        if std::ptr::eq(Arc::as_ptr(source), self) {
            return Err(Error::config("A module cannot be its own source"));
        }
        if !self.sources.add(source) {
            log::debug!(
                "module '{}' already pulls from '{}'",
                self.name(),
                source.name()
            );
        }
        Ok(())
    }

    /// Returns whether `source` was registered.
    pub fn remove_source(&self, source: &impl Node) -> bool {
        self.sources.remove(source.module())
    }

    /// Live sources, highest priority first.
    pub fn sources(&self) -> Vec<Arc<Module>> {
        self.sources.live()
    }

    pub fn mix_sources(&self) -> bool {
        self.sources.mix()
    }

    /// Interleave the data of several sources (default) or drain them one
    /// after another.
    pub fn set_mix_sources(&self, mix: bool) {
        self.sources.set_mix(mix);
    }

    /// Bytes currently held by all sources.
    pub fn source_bytes_available(&self) -> usize {
        self.sources.available()
    }

    /// Pull exactly `count` bytes from the sources, or `None` when they hold
    /// too little.
    pub fn pull_exactly(&self, count: usize) -> Option<Vec<u8>> {
        self.sources.pull_exactly(count)
    }

    /// Pull up to `limit` bytes of whatever the sources hold.
    pub fn pull_available(&self, limit: usize) -> Vec<u8> {
        self.sources.pull_available(limit)
    }

    // -----------------------------------------------------------------------
    // Output buffer
    // -----------------------------------------------------------------------

    /// Append produced data. If the buffer is already full the data is
    /// dropped; it still counts toward [`Module::total_bytes_generated`].
    pub fn add_data(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.total_bytes_generated
            .fetch_add(data.len() as u64, Ordering::AcqRel);
        let written = {
            let mut buffer = lock(&self.buffer);
            if buffer.is_full() {
                false
            } else {
                buffer.write(data);
                self.buffered.store(buffer.len(), Ordering::Release);
                true
            }
        };
        if written {
            self.stats.record_bytes(data);
        }
        self.check_overflow();
    }

    /// Exactly `count` bytes, or nothing if fewer are buffered.
    pub fn read_exactly(&self, count: usize) -> Vec<u8> {
        if count == 0 || self.bytes_in_buffer() < count {
            return Vec::new();
        }
        let data = self.with_buffer(|buffer| {
            if buffer.len() < count {
                Vec::new()
            } else {
                buffer.read(count).unwrap_or_default()
            }
        });
        self.check_overflow();
        data
    }

    /// The whole buffer, or nothing if fewer than `count` bytes are buffered.
    pub fn read_at_least(&self, count: usize) -> Vec<u8> {
        if self.bytes_in_buffer() < count {
            return Vec::new();
        }
        let data = self.with_buffer(|buffer| {
            if buffer.len() < count {
                Vec::new()
            } else {
                buffer.drain_all()
            }
        });
        self.check_overflow();
        data
    }

    /// At most `count` bytes; the whole buffer if it holds no more than that.
    pub fn read_up_to(&self, count: usize) -> Vec<u8> {
        if count == 0 || self.bytes_in_buffer() == 0 {
            return Vec::new();
        }
        let data = self.with_buffer(|buffer| {
            let take = buffer.len().min(count);
            buffer.read(take).unwrap_or_default()
        });
        self.check_overflow();
        data
    }

    /// Drain the buffer.
    pub fn read_all(&self) -> Vec<u8> {
        if self.bytes_in_buffer() == 0 {
            return Vec::new();
        }
        let data = self.with_buffer(RingBuffer::drain_all);
        self.check_overflow();
        data
    }

    /// Copy of the buffered bytes without consuming them.
    pub fn peek(&self) -> Vec<u8> {
        lock(&self.buffer).to_vec()
    }

    /// Discard everything buffered.
    pub fn clear_buffer(&self) {
        self.with_buffer(RingBuffer::clear);
        self.check_overflow();
    }

    pub fn buffer_size(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Resize the output buffer. Shrinking drops the oldest bytes.
    pub fn set_buffer_size(&self, size: usize) -> Result<()> {
        config::validate_buffer_size(size)?;
        self.with_buffer(|buffer| buffer.set_capacity(size));
        self.capacity.store(size, Ordering::Release);
        self.check_overflow();
        Ok(())
    }

    pub fn bytes_in_buffer(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Occupancy ratio in `[0, 1]`.
    pub fn buffer_state(&self) -> f64 {
        let capacity = self.buffer_size();
        if capacity == 0 {
            return 1.0;
        }
        (self.bytes_in_buffer() as f64 / capacity as f64).min(1.0)
    }

    /// Whether the buffer is full.
    pub fn overflow(&self) -> bool {
        self.bytes_in_buffer() >= self.buffer_size()
    }

    /// Explicit read-only handle on this module's output.
    pub fn data_source(self: &Arc<Self>) -> DataSource {
        DataSource::new(self)
    }

    // -----------------------------------------------------------------------
    // Backpressure
    // -----------------------------------------------------------------------

    pub fn pause_on_overflow(&self) -> bool {
        self.pause_on_overflow.load(Ordering::Acquire)
    }

    pub fn set_pause_on_overflow(&self, pause: bool) {
        self.pause_on_overflow.store(pause, Ordering::Release);
        self.check_overflow();
    }

    pub fn overflow_hysteresis(&self) -> f64 {
        self.overflow_hysteresis.load()
    }

    /// Occupancy ratio at or below which an overflow pause ends.
    pub fn set_overflow_hysteresis(&self, value: f64) -> Result<()> {
        config::validate_hysteresis(value)?;
        self.overflow_hysteresis.store(value);
        self.check_overflow();
        Ok(())
    }

    fn check_overflow(&self) {
        // Sampled under the flags lock so the last check sees the last change.
        self.update_flags(|flags| {
            let pause = self.pause_on_overflow();
            let full = self.overflow();
            let resume = self.buffer_state() <= self.overflow_hysteresis();
            if pause && full {
                flags.overflow_paused = true;
            } else if flags.overflow_paused && (resume || !pause) {
                flags.overflow_paused = false;
            }
        });
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Bytes produced since creation or the last [`Module::reset_statistics`],
    /// including bytes dropped on a full buffer.
    pub fn total_bytes_generated(&self) -> u64 {
        self.total_bytes_generated.load(Ordering::Acquire)
    }

    /// Throughput over the time actually spent running.
    pub fn bytes_per_second(&self) -> u64 {
        self.stats.bytes_per_second()
    }

    /// Throughput over wall-clock time, pauses included.
    pub fn bytes_per_second_incl_pause(&self) -> u64 {
        self.stats.bytes_per_second_incl_pause()
    }

    /// Normalized Shannon entropy of recent output, in `[0, 1]`.
    pub fn entropy(&self) -> f64 {
        self.stats.entropy()
    }

    pub fn calculate_entropy(&self) -> bool {
        self.stats.calculate_entropy()
    }

    pub fn set_calculate_entropy(&self, enabled: bool) {
        self.stats.set_calculate_entropy(enabled);
    }

    pub fn calculate_bps(&self) -> bool {
        self.stats.calculate_bps()
    }

    pub fn set_calculate_bps(&self, enabled: bool) {
        self.stats.set_calculate_bps(enabled);
    }

    /// Recompute [`Module::entropy`] now instead of waiting for the next tick.
    pub fn refresh_entropy(&self) {
        if self.calculate_entropy() {
            self.stats.refresh_entropy();
        }
    }

    /// Zero the byte counter and forget throughput and entropy history.
    pub fn reset_statistics(&self) {
        self.total_bytes_generated.store(0, Ordering::Release);
        let running = lock(&self.flags).effective();
        self.stats.reset(0, running);
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Validate and apply `config` as a whole.
    pub fn apply_config(&self, config: &ModuleConfig) -> Result<()> {
        config.validate()?;
        if let Some(name) = &config.name {
            self.set_name(name.clone());
        }
        self.set_priority(config.priority);
        self.set_calculate_entropy(config.calculate_entropy);
        self.set_calculate_bps(config.calculate_bps);
        self.set_mix_sources(config.mix_sources);
        self.overflow_hysteresis.store(config.overflow_hysteresis);
        self.pause_on_overflow
            .store(config.pause_on_overflow, Ordering::Release);
        self.set_buffer_size(config.buffer_size)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn with_buffer<R>(&self, f: impl FnOnce(&mut RingBuffer<u8>) -> R) -> R {
        let mut buffer = lock(&self.buffer);
        let result = f(&mut buffer);
        self.buffered.store(buffer.len(), Ordering::Release);
        result
    }

    /// Apply `change` to the run flags and act on an edge of the effective
    /// run flag.
    fn update_flags(&self, change: impl FnOnce(&mut RunFlags)) {
        let mut flags = lock(&self.flags);
        let before = *flags;
        change(&mut flags);
        let after = *flags;
        if before.effective() == after.effective() {
            if before.state() != after.state() {
                log::debug!("module '{}' {}", self.name(), after.state());
            }
            return;
        }
        let now = Instant::now();
        if after.effective() {
            self.stats
                .activity_started(self.total_bytes_generated(), now);
            self.ensure_worker();
        } else {
            self.stats.activity_stopped(now);
        }
        log::debug!("module '{}' {}", self.name(), after.state());
        drop(flags);
        self.wake.notify_all();
    }

    /// Spawn the worker on the first rising edge. It persists until disposal
    /// or until the module is dropped.
    fn ensure_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() || self.should_stop.load(Ordering::Acquire) {
            return;
        }
        let this = self.this.clone();
        match thread::Builder::new()
            .name(self.name())
            .spawn(move || worker_loop(this))
        {
            Ok(handle) => *worker = Some(handle),
            Err(e) => log::error!("failed to spawn worker of module '{}': {e}", self.name()),
        }
    }

    /// Block until the module may run or the park timeout elapses. Returns
    /// whether a step should be taken now.
    fn wait_for_run(&self) -> bool {
        let flags = lock(&self.flags);
        if flags.effective() {
            return true;
        }
        let (flags, _) = self
            .wake
            .wait_timeout(flags, PARK_TIMEOUT)
            .unwrap_or_else(PoisonError::into_inner);
        flags.effective() && !self.should_stop.load(Ordering::Acquire)
    }

    pub(crate) fn tick(&self) {
        self.stats
            .tick(self.total_bytes_generated(), Instant::now());
        self.stage.periodic(self);
    }
}

fn worker_loop(this: Weak<Module>) {
    loop {
        let Some(module) = this.upgrade() else {
            return;
        };
        if module.should_stop.load(Ordering::Acquire) {
            return;
        }
        if !module.wait_for_run() {
            continue;
        }
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            module.stage.step(&module)
        }));
        match outcome {
            Ok(StepOutcome::Progress) => {}
            Ok(StepOutcome::Idle) => {
                drop(module);
                thread::sleep(IDLE_SLEEP);
            }
            Err(_) => {
                log::error!(
                    "worker of module '{}' panicked; its buffer will no longer be filled",
                    module.name()
                );
                return;
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("bytes_in_buffer", &self.bytes_in_buffer())
            .field("buffer_size", &self.buffer_size())
            .field("total_bytes_generated", &self.total_bytes_generated())
            .field("disposed", &self.disposed())
            .finish()
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        let spawned = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if spawned && !*self.disposed.get_mut() {
            log::warn!(
                "module '{}' dropped without dispose()",
                self.name
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
            );
        }
    }
}
