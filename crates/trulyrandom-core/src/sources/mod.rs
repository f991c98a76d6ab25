//! Built-in entropy devices and the module that feeds them into a pipeline.

pub mod os;
pub mod timing;

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data_source::DataSource;
use crate::module::{Module, Node, Stage, StepOutcome};
use crate::source::{EntropySource, SourceInfo};

pub use os::OsEntropySource;
pub use timing::ClockJitterSource;

/// All built-in sources that are available on this machine.
pub fn available_sources() -> Vec<Box<dyn EntropySource>> {
    let all: Vec<Box<dyn EntropySource>> = vec![
        Box::new(ClockJitterSource::default()),
        Box::new(OsEntropySource::default()),
    ];
    all.into_iter().filter(|s| s.is_available()).collect()
}

struct DeviceStage {
    source: Box<dyn EntropySource>,
    reads: AtomicU64,
    empty_reads: AtomicU64,
}

impl Stage for DeviceStage {
    fn step(&self, module: &Module) -> StepOutcome {
        let data = self.source.read_available_bytes();
        self.reads.fetch_add(1, Ordering::Relaxed);
        if data.is_empty() {
            self.empty_reads.fetch_add(1, Ordering::Relaxed);
            return StepOutcome::Idle;
        }
        module.add_data(&data);
        StepOutcome::Progress
    }
}

/// A module with no upstream that polls an [`EntropySource`] in its worker.
#[derive(Clone)]
pub struct SourceModule {
    module: Arc<Module>,
    stage: Arc<DeviceStage>,
}

impl SourceModule {
    /// Create a stopped module named after the source.
    pub fn new(source: Box<dyn EntropySource>) -> Self {
        if !source.is_available() {
            log::warn!("entropy source '{}' reports itself unavailable", source.name());
        }
        let name = source.name();
        let stage = Arc::new(DeviceStage {
            source,
            reads: AtomicU64::new(0),
            empty_reads: AtomicU64::new(0),
        });
        let module = Module::new(name, Arc::clone(&stage) as Arc<dyn Stage>);
        Self { module, stage }
    }

    pub fn source_info(&self) -> &SourceInfo {
        self.stage.source.info()
    }

    /// Device polls so far.
    pub fn reads(&self) -> u64 {
        self.stage.reads.load(Ordering::Relaxed)
    }

    /// Device polls that returned nothing.
    pub fn empty_reads(&self) -> u64 {
        self.stage.empty_reads.load(Ordering::Relaxed)
    }

    pub fn data_source(&self) -> DataSource {
        DataSource::new(&self.module)
    }
}

impl Deref for SourceModule {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

impl Node for SourceModule {
    fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

impl std::fmt::Debug for SourceModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceModule")
            .field("source", &self.source_info().name)
            .field("module", &self.module)
            .finish()
    }
}
