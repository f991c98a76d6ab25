//! Build a full post-processing graph and watch it regulate itself.
//!
//! clock jitter → von Neumann → shuffle (seeded from the OS) → SHA-512 → consumer
//!
//! Run: `RUST_LOG=debug cargo run --example pipeline`

use std::thread;
use std::time::Duration;

use trulyrandom_core::{
    ClockJitterSource, HashExtractor, Module, OsEntropySource, Seedable, ShuffleExtractor,
    SourceModule, VonNeumannExtractor,
};

fn main() -> trulyrandom_core::Result<()> {
    env_logger::init();

    let jitter = SourceModule::new(Box::new(ClockJitterSource::default()));
    let os = SourceModule::new(Box::new(OsEntropySource::new(256)));
    os.set_buffer_size(4096)?;

    let debias = VonNeumannExtractor::new();
    debias.add_source(&jitter)?;

    let shuffle = ShuffleExtractor::new();
    shuffle.set_batch_size(64 * 1024)?;
    shuffle.add_source(&debias)?;
    shuffle.set_seed_rotation_interval(Duration::from_secs(2));

    let hash = HashExtractor::new();
    hash.set_batch_size(16 * 1024)?;
    hash.set_buffer_size(256 * 1024)?;
    hash.add_source(&shuffle)?;
    hash.set_calculate_entropy(true);
    // Compress harder as the consumer falls behind.
    debias.set_dynamic_coefficient_source(Some(&hash));
    shuffle.set_dynamic_coefficient_source(Some(&hash));

    for module in [&*jitter, &*os, &*debias, &*shuffle, &*hash] {
        module.start();
    }
    shuffle.set_seed_source(Some(&os));

    let output = hash.data_source();
    for second in 1..=5 {
        thread::sleep(Duration::from_secs(1));
        hash.refresh_entropy();
        report(second, &[&*jitter, &*debias, &*shuffle, &*hash]);
        if let Some(value) = output.next_u64() {
            println!("  sample u64: {value:#018x}");
        }
    }

    let drained = output.read_all();
    println!("\nDrained {} bytes from the consumer end.", drained.len());

    for module in [&*hash, &*shuffle, &*debias, &*os, &*jitter] {
        module.dispose();
    }
    Ok(())
}

fn report(second: u32, modules: &[&Module]) {
    println!("t={second}s");
    for module in modules {
        println!(
            "  {:<22} {:>9} B buffered  {:>9} B/s  {:.3} entropy  {}",
            module.name(),
            module.bytes_in_buffer(),
            module.bytes_per_second(),
            module.entropy(),
            module.state()
        );
    }
}
