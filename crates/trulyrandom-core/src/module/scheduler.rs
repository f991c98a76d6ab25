//! One shared periodic timer driving the statistics of every live module.
//!
//! Modules register a weak reference at construction and unregister on
//! disposal. The timer thread never keeps a module alive between ticks and
//! isolates panics of individual modules.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;

use crate::config::TICK_PERIOD;
use crate::lock;
use crate::module::Module;

struct Scheduler {
    modules: Mutex<Vec<Weak<Module>>>,
}

static SCHEDULER: OnceLock<Arc<Scheduler>> = OnceLock::new();

fn scheduler() -> &'static Arc<Scheduler> {
    SCHEDULER.get_or_init(|| {
        let scheduler = Arc::new(Scheduler {
            modules: Mutex::new(Vec::new()),
        });
        let worker = Arc::clone(&scheduler);
        if let Err(e) = thread::Builder::new()
            .name("trulyrandom-stats".into())
            .spawn(move || worker.run())
        {
            log::error!("failed to spawn statistics scheduler: {e}");
        }
        scheduler
    })
}

impl Scheduler {
    fn run(&self) {
        loop {
            thread::sleep(TICK_PERIOD);
            let live: Vec<Arc<Module>> = {
                let mut modules = lock(&self.modules);
                modules.retain(|m| m.strong_count() > 0);
                modules.iter().filter_map(Weak::upgrade).collect()
            };
            for module in live {
                let ticked =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| module.tick()));
                if ticked.is_err() {
                    log::error!("statistics tick of module '{}' panicked", module.name());
                }
            }
        }
    }
}

/// Start ticking `module` every [`TICK_PERIOD`].
pub(crate) fn register(module: &Arc<Module>) {
    lock(&scheduler().modules).push(Arc::downgrade(module));
}

/// Stop ticking `module`.
pub(crate) fn unregister(module: &Module) {
    let target: *const Module = module;
    lock(&scheduler().modules).retain(|m| !std::ptr::eq(m.as_ptr(), target));
}
