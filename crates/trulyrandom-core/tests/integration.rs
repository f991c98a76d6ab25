//! Integration tests for trulyrandom-core.
//!
//! These wire real modules into small graphs and observe them through their
//! public read API: sources → extractors/buffers/testers → consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use trulyrandom_core::{
    Buffer, DirSpillover, FullTestResult, HashExtractor, HashFunction, Module, OsEntropySource,
    RunState, Seedable, ShuffleExtractor, SingleTestResult, SourceModule, Spillover,
    SpilloverPolicy, TestSuite, Tester, VonNeumannExtractor,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

fn passive_with(name: &str, data: &[u8]) -> Arc<Module> {
    let module = Module::passive(name);
    module.add_data(data);
    module
}

/// Longest run of consecutive `value` bytes.
fn longest_run(data: &[u8], value: u8) -> usize {
    let mut best = 0;
    let mut current = 0;
    for &byte in data {
        if byte == value {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

fn wait_for_shuffle(extractor: &ShuffleExtractor, input_len: u64) {
    assert!(
        wait_until(|| extractor.total_bytes_consumed() == input_len),
        "extractor consumed {} of {input_len} bytes",
        extractor.total_bytes_consumed()
    );
}

/// Shuffle extractor with 100-byte batches of single-byte blocks, fed by a
/// passive input module.
fn shuffle_stage(seed: &[u8]) -> (ShuffleExtractor, Arc<Module>) {
    let source = Module::passive("input");
    let extractor = ShuffleExtractor::new();
    extractor.set_batch_size(100).unwrap();
    extractor.set_block_size(1).unwrap();
    extractor.set_seed(seed).unwrap();
    extractor.add_source(&source).unwrap();
    (extractor, source)
}

#[test]
fn mixing_interleaves_sources() {
    init_logging();
    let sources = [
        passive_with("a", &[1; 100]),
        passive_with("b", &[2; 57]),
        passive_with("c", &[3; 5]),
    ];
    let buffer = Buffer::new();
    for source in &sources {
        buffer.add_source(source).unwrap();
    }
    buffer.start();
    assert!(wait_until(|| buffer.bytes_in_buffer() == 162));
    let output = buffer.read_all();

    for (value, count) in [(1u8, 100usize), (2, 57), (3, 5)] {
        assert_eq!(output.iter().filter(|&&b| b == value).count(), count);
        assert!(
            longest_run(&output, value) < count,
            "source {value} was not interleaved"
        );
    }
    buffer.dispose();
    sources.iter().for_each(|s| s.dispose());
}

#[test]
fn disabled_mixing_keeps_runs_contiguous() {
    init_logging();
    let sources = [
        passive_with("a", &[1; 100]),
        passive_with("b", &[2; 57]),
        passive_with("c", &[3; 5]),
    ];
    let buffer = Buffer::new();
    buffer.set_mix_sources(false);
    for source in &sources {
        buffer.add_source(source).unwrap();
    }
    buffer.start();
    assert!(wait_until(|| buffer.bytes_in_buffer() == 162));
    let output = buffer.read_all();

    assert_eq!(longest_run(&output, 1), 100);
    assert_eq!(longest_run(&output, 2), 57);
    assert_eq!(longest_run(&output, 3), 5);
    buffer.dispose();
    sources.iter().for_each(|s| s.dispose());
}

#[test]
fn priority_orders_unmixed_sources() {
    init_logging();
    let low = passive_with("low", &[1; 10]);
    let high = passive_with("high", &[2; 10]);
    high.set_priority(5);
    let buffer = Buffer::new();
    buffer.set_mix_sources(false);
    buffer.add_source(&low).unwrap();
    buffer.add_source(&high).unwrap();
    buffer.start();
    assert!(wait_until(|| buffer.bytes_in_buffer() == 20));
    let output = buffer.read_all();
    assert_eq!(&output[..10], &[2; 10]);
    assert_eq!(&output[10..], &[1; 10]);
    buffer.dispose();
    low.dispose();
    high.dispose();
}

#[test]
fn shuffle_is_deterministic_per_seed() {
    init_logging();
    let input = random_bytes(1000, 42);

    let (first, first_input) = shuffle_stage(&[0x11; 64]);
    let (second, second_input) = shuffle_stage(&[0x11; 64]);
    let (other, other_input) = shuffle_stage(&[0x99; 64]);
    for (extractor, source) in [
        (&first, &first_input),
        (&second, &second_input),
        (&other, &other_input),
    ] {
        source.add_data(&input);
        extractor.start();
        wait_for_shuffle(extractor, input.len() as u64);
    }

    // Same bytes regardless of how the output is split across reads.
    let whole = first.read_all();
    assert!(!whole.is_empty());
    let half = whole.len() / 2;
    let mut split = second.read_exactly(half);
    split.extend(second.read_all());
    assert_eq!(split, whole);

    assert_ne!(other.read_all(), whole);

    for (extractor, source) in [(first, first_input), (second, second_input), (other, other_input)]
    {
        extractor.dispose();
        source.dispose();
    }
}

#[test]
fn seed_rotation_changes_output() {
    init_logging();
    let input = random_bytes(1000, 7);
    let seeds = passive_with("seed", &random_bytes(128, 8));
    let (extractor, source) = shuffle_stage(&[0]);
    extractor.set_seed_rotation_interval(Duration::from_secs(3600));
    extractor.set_seed_source(Some(&seeds));
    assert_eq!(seeds.bytes_in_buffer(), 64, "setting a source rotates at once");
    extractor.start();

    let run = |expected_total: u64| {
        source.add_data(&input);
        wait_for_shuffle(&extractor, expected_total);
        extractor.read_all()
    };
    let phase1 = run(1000);
    let phase2 = run(2000);
    assert_eq!(phase1, phase2, "same seed, same input");

    assert!(extractor.force_rotate_seed());
    let phase3 = run(3000);
    assert_ne!(phase1, phase3, "rotated seed");

    // Source exhausted: the old seed stays.
    assert!(!extractor.force_rotate_seed());
    let phase4 = run(4000);
    assert_eq!(phase3, phase4);

    extractor.dispose();
    source.dispose();
    seeds.dispose();
}

#[test]
fn hash_batch_follows_pressure() {
    init_logging();
    let hash = HashExtractor::new();
    hash.set_input_block_size(64).unwrap();
    hash.set_batch_size(640).unwrap();
    let source = passive_with("input", &random_bytes(640, 1));
    hash.add_source(&source).unwrap();
    assert_eq!(hash.actual_compression(), 1.0);
    hash.start();
    assert!(wait_until(|| hash.bytes_in_buffer() == 640));
    assert_eq!(hash.total_bytes_consumed(), 640);

    // A downstream module at 64% occupancy triples the batch, not the block.
    let downstream = passive_with("downstream", &[0; 64]);
    downstream.set_buffer_size(100).unwrap();
    hash.set_dynamic_coefficient_source(Some(&downstream));
    assert_eq!(hash.actual_batch_size(), 1920);
    assert_eq!(hash.actual_compression(), 1.0);
    hash.read_all();
    source.add_data(&random_bytes(1920, 2));
    assert!(wait_until(|| hash.total_bytes_consumed() == 2560));
    assert!(wait_until(|| hash.bytes_in_buffer() == 1920));
    assert!((hash.last_dynamic_coefficient() - 0.64).abs() < 1e-9);

    hash.dispose();
    source.dispose();
    downstream.dispose();
}

#[test]
fn hash_keeps_every_block_while_own_buffer_fills() {
    init_logging();
    let hash = HashExtractor::new();
    hash.set_hash_function(HashFunction::Sha512);
    hash.set_input_block_size(64).unwrap();
    hash.set_batch_size(64).unwrap();
    hash.set_buffer_size(1000).unwrap();
    let source = passive_with("input", &random_bytes(640, 3));
    hash.add_source(&source).unwrap();
    hash.start();

    // Own occupancy passes 0.5 at 512 bytes; the tripled batch waits for input.
    assert!(wait_until(|| hash.total_bytes_consumed() == 512));
    assert!(wait_until(|| hash.bytes_in_buffer() == 512));
    assert_eq!(hash.total_bytes_produced(), hash.total_bytes_consumed());
    assert_eq!(hash.actual_compression(), 1.0);

    let mut out = hash.read_all();
    assert!(wait_until(|| hash.total_bytes_consumed() == 640));
    assert!(wait_until(|| hash.bytes_in_buffer() == 128));
    out.extend(hash.read_all());
    assert_eq!(out.len(), 640);
    assert_eq!(hash.total_bytes_produced(), 640);

    hash.dispose();
    source.dispose();
}

#[test]
fn von_neumann_halves_alternating_input() {
    init_logging();
    let source = passive_with("input", &[0xAA; 10_000]);
    let debias = VonNeumannExtractor::new();
    debias.add_source(&source).unwrap();
    debias.start();
    assert!(wait_until(|| debias.total_bytes_consumed() == 10_000));
    assert!(wait_until(|| debias.bytes_in_buffer() == 5_000));
    assert!(debias.read_all().iter().all(|&b| b == 0));
    assert_eq!(debias.actual_compression(), 2.0);
    debias.dispose();
    source.dispose();
}

#[test]
fn entropy_bounds() {
    init_logging();
    let constant = Module::passive("constant");
    constant.set_calculate_entropy(true);
    constant.add_data(&[0x42; 10_000]);
    constant.refresh_entropy();
    assert_eq!(constant.entropy(), 0.0);

    let every_value: Vec<u8> = (0..=255).collect();
    let uniform = Module::passive("uniform");
    uniform.set_calculate_entropy(true);
    uniform.add_data(&every_value);
    uniform.refresh_entropy();
    assert!((uniform.entropy() - 1.0).abs() < 1e-12);

    constant.dispose();
    uniform.dispose();
}

#[test]
fn full_pipeline_pauses_and_resumes() {
    init_logging();
    let device = SourceModule::new(Box::new(OsEntropySource::new(256)));
    device.set_buffer_size(4096).unwrap();
    let hash = HashExtractor::new();
    hash.set_batch_size(1024).unwrap();
    hash.set_buffer_size(1024).unwrap();
    hash.set_overflow_hysteresis(0.25).unwrap();
    hash.add_source(&device).unwrap();

    device.start();
    hash.start();
    assert!(wait_until(|| hash.state() == RunState::OverflowPaused));
    assert!(hash.overflow());

    // Starve the extractor so it cannot refill behind our back.
    device.stop();
    device.clear_buffer();

    // Above the hysteresis threshold the pause holds.
    assert_eq!(hash.read_exactly(512).len(), 512);
    assert_eq!(hash.state(), RunState::OverflowPaused);
    assert_eq!(hash.read_exactly(256).len(), 256);
    assert_eq!(hash.state(), RunState::Running);

    device.start();
    assert!(wait_until(|| hash.bytes_in_buffer() > 256));
    let output = hash.data_source();
    assert!(output.next_u64().is_some());

    hash.dispose();
    hash.dispose();
    assert!(hash.disposed());
    device.dispose();
}

#[test]
fn buffer_spills_to_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let spillover: Arc<dyn Spillover> = Arc::new(DirSpillover::new(dir.path(), 16).unwrap());
    let policy = SpilloverPolicy {
        chunk_size: 128,
        min_bytes_in_buffer: 128,
        max_bytes_in_buffer: 512,
    };
    let buffer = Buffer::with_spillover(Arc::clone(&spillover), policy).unwrap();
    buffer.set_buffer_size(4096).unwrap();
    let input = random_bytes(2048, 3);
    let source = Module::passive("input");
    source.set_buffer_size(4096).unwrap();
    source.add_data(&input);
    buffer.add_source(&source).unwrap();
    buffer.start();

    assert!(wait_until(|| source.bytes_in_buffer() == 0 && buffer.bytes_in_buffer() == 512));
    assert_eq!(buffer.spilled_chunks(), 12);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 12);

    let mut drained = Vec::new();
    assert!(wait_until(|| {
        drained.extend(buffer.read_all());
        drained.len() == input.len()
    }));
    let mut sorted_in = input.clone();
    let mut sorted_out = drained;
    sorted_in.sort_unstable();
    sorted_out.sort_unstable();
    assert_eq!(sorted_in, sorted_out);

    buffer.dispose();
    source.dispose();
}

/// Fails any batch containing a zero byte.
struct NoZeros;

impl TestSuite for NoZeros {
    fn perform(&self, data: &[u8]) -> FullTestResult {
        let result = SingleTestResult {
            name: "no_zeros".into(),
            passed: !data.contains(&0),
            p_value: None,
        };
        FullTestResult::from_results(vec![result], 0.0)
    }
}

#[test]
fn tester_forwards_only_passing_batches() {
    init_logging();
    let mut input = vec![1u8; 100];
    input.extend([0u8; 100]);
    input.extend([2u8; 100]);
    let source = passive_with("input", &input);

    let tester = Tester::new(Box::new(NoZeros));
    tester.set_batch_size(100).unwrap();
    tester.add_source(&source).unwrap();
    tester.start();

    assert!(wait_until(|| tester.batches_tested() == 3));
    assert!(wait_until(|| tester.bytes_in_buffer() == 200));
    assert_eq!(tester.batches_failed(), 1);
    assert_eq!(tester.total_bytes_consumed(), 300);

    let output = tester.read_all();
    assert_eq!(&output[..100], &[1; 100]);
    assert_eq!(&output[100..], &[2; 100]);
    let last = tester.last_test_result().unwrap();
    assert!(last.success);
    assert_eq!(last.successful_test_proportion, 1.0);

    tester.dispose();
    source.dispose();
}
