//! Pass-through accumulator with optional spillover.

use std::ops::Deref;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{PULL_LIMIT, SpilloverPolicy};
use crate::data_source::DataSource;
use crate::error::Result;
use crate::module::{Module, Node, Stage, StepOutcome};
use crate::spillover::Spillover;
use crate::{lock, read_lock, write_lock};

struct BufferStage {
    spillover: RwLock<Option<Arc<dyn Spillover>>>,
    policy: Mutex<SpilloverPolicy>,
}

impl BufferStage {
    /// Move one chunk between the buffer and the spillover if the policy
    /// asks for it. Returns whether anything moved.
    fn balance(&self, module: &Module, spillover: &dyn Spillover) -> bool {
        let policy = lock(&self.policy).clone();
        let buffered = module.bytes_in_buffer();

        if buffered > policy.max_bytes_in_buffer {
            let chunk = module.read_exactly(policy.chunk_size.min(buffered));
            if chunk.is_empty() {
                return false;
            }
            return match spillover.save(&chunk) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!(
                        "{}: spillover save failed, {} bytes lost: {e}",
                        module.name(),
                        chunk.len()
                    );
                    false
                }
            };
        }

        let free = module.buffer_size().saturating_sub(buffered);
        if buffered < policy.min_bytes_in_buffer
            && free >= policy.chunk_size
            && spillover.count_available_chunks() > 0
        {
            match spillover.load() {
                Ok(Some(chunk)) => {
                    module.add_data(&chunk);
                    return true;
                }
                Ok(None) => {}
                Err(e) => log::warn!("{}: spillover load failed: {e}", module.name()),
            }
        }
        false
    }
}

impl Stage for BufferStage {
    fn step(&self, module: &Module) -> StepOutcome {
        let mut progressed = false;
        let spillover = read_lock(&self.spillover).clone();

        let buffered = module.bytes_in_buffer();
        let mut limit = module.buffer_size().saturating_sub(buffered).min(PULL_LIMIT);
        if spillover.is_some() {
            // Overshoot the spill threshold by one chunk at most.
            let policy = lock(&self.policy);
            let ceiling = policy.max_bytes_in_buffer.saturating_add(policy.chunk_size);
            limit = limit.min(ceiling.saturating_sub(buffered));
        }
        if limit > 0 {
            let data = module.pull_available(limit);
            if !data.is_empty() {
                module.add_data(&data);
                progressed = true;
            }
        }

        if let Some(spillover) = spillover {
            progressed |= self.balance(module, spillover.as_ref());
        }

        if progressed {
            StepOutcome::Progress
        } else {
            StepOutcome::Idle
        }
    }
}

/// Collects whatever its sources hold into its own buffer, mixing or
/// draining them in turn like any module. With a [`Spillover`] attached it
/// parks surplus chunks outside the buffer and loads them back when the
/// buffer runs low.
#[derive(Clone)]
pub struct Buffer {
    module: Arc<Module>,
    stage: Arc<BufferStage>,
}

impl Buffer {
    pub fn new() -> Self {
        let stage = Arc::new(BufferStage {
            spillover: RwLock::new(None),
            policy: Mutex::new(SpilloverPolicy::default()),
        });
        let module = Module::new("buffer", Arc::clone(&stage) as Arc<dyn Stage>);
        Self { module, stage }
    }

    /// Buffer with `spillover` attached under `policy`.
    pub fn with_spillover(spillover: Arc<dyn Spillover>, policy: SpilloverPolicy) -> Result<Self> {
        let buffer = Self::new();
        buffer.set_spillover_policy(policy)?;
        buffer.set_spillover(Some(spillover));
        Ok(buffer)
    }

    pub fn set_spillover(&self, spillover: Option<Arc<dyn Spillover>>) {
        *write_lock(&self.stage.spillover) = spillover;
    }

    pub fn spillover_policy(&self) -> SpilloverPolicy {
        lock(&self.stage.policy).clone()
    }

    pub fn set_spillover_policy(&self, policy: SpilloverPolicy) -> Result<()> {
        policy.validate()?;
        if policy.max_bytes_in_buffer.saturating_add(policy.chunk_size) >= self.buffer_size() {
            log::warn!(
                "{}: spill threshold {} plus chunk {} reaches the buffer size {}; \
                 nothing spills while the buffer is paused on overflow",
                self.name(),
                policy.max_bytes_in_buffer,
                policy.chunk_size,
                self.buffer_size()
            );
        }
        *lock(&self.stage.policy) = policy;
        Ok(())
    }

    /// Chunks currently held by the spillover.
    pub fn spilled_chunks(&self) -> usize {
        read_lock(&self.stage.spillover)
            .as_ref()
            .map_or(0, |s| s.count_available_chunks())
    }

    pub fn clear_spillover(&self) -> Result<()> {
        let spillover = read_lock(&self.stage.spillover).clone();
        match spillover {
            Some(spillover) => spillover.clear(),
            None => Ok(()),
        }
    }

    pub fn data_source(&self) -> DataSource {
        DataSource::new(&self.module)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Buffer {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

impl Node for Buffer {
    fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("module", &self.module)
            .field("spilled_chunks", &self.spilled_chunks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spillover::MemorySpillover;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_passes_source_data_through() {
        let source = Module::passive("upstream");
        source.add_data(&[1, 2, 3, 4, 5]);
        let buffer = Buffer::new();
        buffer.add_source(&source).unwrap();
        buffer.start();
        assert!(wait_until(Duration::from_secs(5), || buffer.bytes_in_buffer() == 5));
        assert_eq!(buffer.read_all(), vec![1, 2, 3, 4, 5]);
        assert_eq!(source.bytes_in_buffer(), 0);
        buffer.dispose();
        source.dispose();
    }

    #[test]
    fn test_spills_and_reloads() {
        let spillover: Arc<dyn Spillover> = Arc::new(MemorySpillover::new(100));
        let policy = SpilloverPolicy {
            chunk_size: 100,
            min_bytes_in_buffer: 150,
            max_bytes_in_buffer: 300,
        };
        let buffer = Buffer::with_spillover(Arc::clone(&spillover), policy).unwrap();
        buffer.set_buffer_size(1000).unwrap();
        let source = Module::passive("upstream");
        source.set_buffer_size(2000).unwrap();
        source.add_data(&[0x11; 1000]);
        buffer.add_source(&source).unwrap();
        buffer.start();

        assert!(wait_until(Duration::from_secs(5), || buffer.spilled_chunks() == 7));
        assert_eq!(source.bytes_in_buffer(), 0);
        assert_eq!(buffer.bytes_in_buffer(), 300);

        // Draining the buffer brings chunks back.
        let mut drained = buffer.read_all().len();
        assert!(wait_until(Duration::from_secs(5), || {
            drained += buffer.read_all().len();
            drained == 1000
        }));
        assert_eq!(buffer.spilled_chunks(), 0);
        buffer.dispose();
        source.dispose();
    }

    #[test]
    fn test_clear_spillover() {
        let spillover: Arc<dyn Spillover> = Arc::new(MemorySpillover::new(4));
        spillover.save(&[1; 8]).unwrap();
        let buffer = Buffer::with_spillover(spillover, SpilloverPolicy::default()).unwrap();
        assert_eq!(buffer.spilled_chunks(), 1);
        buffer.clear_spillover().unwrap();
        assert_eq!(buffer.spilled_chunks(), 0);
        buffer.dispose();
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let buffer = Buffer::new();
        let policy = SpilloverPolicy {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(buffer.set_spillover_policy(policy).is_err());
        let huge = SpilloverPolicy {
            max_bytes_in_buffer: usize::MAX,
            ..Default::default()
        };
        assert!(buffer.set_spillover_policy(huge).is_err());
        assert_eq!(buffer.spillover_policy(), SpilloverPolicy::default());
        buffer.dispose();
    }
}
