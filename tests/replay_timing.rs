//! Paced replay timing and cancellation.

use linkrec::{LinkError, Record, ReplayEngine, Speed, StoreConfig, WritableStore};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn write_store(dir: &TempDir, timestamps: &[(u32, f32)]) -> PathBuf {
    let path = dir.path().join("store");
    let mut store = WritableStore::create(&path, &StoreConfig::default()).unwrap();
    for &(ts, subsec) in timestamps {
        store.append(&Record::new(ts, subsec, 1, vec![0x80])).unwrap();
    }
    store.close().unwrap();
    path
}

/// Replay and return the instant each record was dispatched.
fn dispatch_times(path: &Path, speed: Speed) -> Vec<Instant> {
    let mut times = Vec::new();
    {
        let mut engine = ReplayEngine::open(path).unwrap();
        engine.register_fn(|_: &Record| {
            times.push(Instant::now());
            Ok(())
        });
        engine.run(speed, None, None).unwrap();
    }
    times
}

#[test]
fn test_double_speed_halves_gaps() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(1000, 0.0), (1002, 0.0)]);

    let times = dispatch_times(&path, Speed::multiple(2.0).unwrap());
    assert_eq!(times.len(), 2);

    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(950), "gap too short: {:?}", gap);
    assert!(gap < Duration::from_millis(1500), "gap too long: {:?}", gap);
}

#[test]
fn test_max_speed_does_not_sleep() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(1000, 0.0), (1002, 0.0), (5000, 0.0)]);

    let started = Instant::now();
    let times = dispatch_times(&path, Speed::Max);
    assert_eq!(times.len(), 3);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_subsecond_offsets_are_honoured() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(10, 0.0), (10, 0.5)]);

    let times = dispatch_times(&path, Speed::realtime());
    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(450), "gap too short: {:?}", gap);
    assert!(gap < Duration::from_millis(900), "gap too long: {:?}", gap);
}

#[test]
fn test_first_record_dispatched_immediately() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(10, 0.0), (11, 0.0)]);

    let started = Instant::now();
    let times = dispatch_times(&path, Speed::multiple(4.0).unwrap());
    assert!(times[0] - started < Duration::from_millis(200));
}

#[test]
fn test_start_bound_shifts_schedule() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(10, 0.0), (20, 0.0), (21, 0.0)]);

    // Starting at 20 skips the ten second lead-in
    let started = Instant::now();
    let mut count = 0;
    {
        let mut engine = ReplayEngine::open(&path).unwrap();
        engine.register_fn(|_: &Record| {
            count += 1;
            Ok(())
        });
        engine.run(Speed::multiple(4.0).unwrap(), Some(20), None).unwrap();
    }
    assert_eq!(count, 2);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_cancel_stops_paced_run() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(0, 0.0), (60, 0.0), (120, 0.0)]);

    let mut engine = ReplayEngine::open(&path).unwrap();
    let cancel = engine.cancel_token();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        cancel.cancel();
    });

    let started = Instant::now();
    let stats = engine.run(Speed::realtime(), None, None).unwrap();
    canceller.join().unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.dispatched, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_cancel_token_reset_allows_rerun() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(0, 0.0), (1, 0.0)]);

    let mut engine = ReplayEngine::open(&path).unwrap();
    let cancel = engine.cancel_token();
    cancel.cancel();

    let stats = engine.run(Speed::Max, None, None).unwrap();
    assert!(stats.cancelled);
    assert_eq!(stats.dispatched, 0);

    cancel.reset();
    let stats = engine.run(Speed::Max, None, None).unwrap();
    assert!(!stats.cancelled);
    assert_eq!(stats.dispatched, 2);
}

// --- Extreme Speeds ---

#[test]
fn test_vanishing_speed_is_rejected_without_panicking() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(0, 0.0), (1, 0.0)]);
    let speed: Speed = "1e-20".parse().unwrap();

    let mut calls = 0;
    let result = {
        let mut engine = ReplayEngine::open(&path).unwrap();
        engine.register_fn(|_: &Record| {
            calls += 1;
            Ok(())
        });
        engine.run(speed, None, None)
    };

    assert!(matches!(result, Err(LinkError::Config(_))));
    // The first record is due at once; the second never could be
    assert_eq!(calls, 1);
}

#[test]
fn test_unvalidated_speed_factor_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(0, 0.0), (1, 0.0)]);

    for factor in [0.0, -1.0, f64::NAN] {
        let mut calls = 0;
        let result = {
            let mut engine = ReplayEngine::open(&path).unwrap();
            engine.register_fn(|_: &Record| {
                calls += 1;
                Ok(())
            });
            engine.run(Speed::Multiple(factor), None, None)
        };
        assert!(matches!(result, Err(LinkError::Config(_))), "factor {}", factor);
        assert_eq!(calls, 0);
    }
}

#[test]
fn test_infinite_factor_runs_unpaced() {
    let dir = TempDir::new().unwrap();
    let path = write_store(&dir, &[(0, 0.0), (3600, 0.0)]);

    let started = Instant::now();
    let times = dispatch_times(&path, Speed::Multiple(f64::INFINITY));
    assert_eq!(times.len(), 2);
    assert!(started.elapsed() < Duration::from_millis(500));
}
