//! Battery behavior on generated data and inside a tester module.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use trulyrandom_core::{OsEntropySource, SourceModule, TestSuite, Tester};
use trulyrandom_tests::{Battery, StatTest};

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

#[test]
fn csprng_output_passes() {
    let full = Battery::default().perform(&random_bytes(125_000, 2024));
    assert!(
        full.success,
        "failed: {:?}",
        full.results.iter().filter(|r| !r.passed).collect::<Vec<_>>()
    );
    assert_eq!(full.results.len(), StatTest::ALL.len());
}

#[test]
fn biased_output_fails() {
    // Three quarters of the bits set.
    let data: Vec<u8> = random_bytes(20_000, 5)
        .chunks_exact(2)
        .map(|pair| pair[0] | pair[1])
        .collect();
    let full = Battery::default().perform(&data);
    assert!(!full.success);
}

#[test]
fn tester_gates_os_entropy() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = SourceModule::new(Box::new(OsEntropySource::new(4096)));
    let tester = Tester::new(Box::new(Battery::default()));
    tester.set_batch_size(16_384).unwrap();
    tester.add_source(&device).unwrap();
    device.start();
    tester.start();

    let deadline = Instant::now() + Duration::from_secs(30);
    while tester.batches_tested() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(tester.batches_tested() >= 3);
    let passed = tester.batches_tested() - tester.batches_failed();
    assert!(passed >= 1);
    assert!(tester.last_test_result().is_some());

    tester.dispose();
    device.dispose();
}
