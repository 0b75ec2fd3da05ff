use std::{sync::Arc, thread, time::Duration};

use crate::{MockClock, RateLimiter, RateLimiterOptions, SweepIntervalMs};

fn limiter() -> (Arc<RateLimiter<MockClock>>, MockClock) {
    let clock = MockClock::default();
    let rl = RateLimiter::with_clock(RateLimiterOptions::default(), clock.clone());
    (Arc::new(rl), clock)
}

#[test]
fn test_cleanup_loop_sweeps_expired_windows() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();
    rl.decide("key2", &[10, 100]).unwrap();
    rl.decide("key3", &[10, 100]).unwrap();
    assert_eq!(rl.count(), 3);

    rl.run_cleanup_loop_with_config(20);
    assert!(rl.is_cleanup_loop_running());

    // Windows are still open on the first ticks.
    thread::sleep(Duration::from_millis(60));
    assert_eq!(rl.count(), 3);

    clock.advance(Duration::from_millis(101));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 0);

    rl.stop_cleanup_loop();
}

#[test]
fn test_cleanup_loop_keeps_active_entries() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();
    rl.run_cleanup_loop_with_config(20);

    // Keep the key active by opening a new window every time the old one ends.
    for _ in 0..5 {
        clock.advance(Duration::from_millis(100));
        rl.decide("key1", &[10, 100]).unwrap();
        thread::sleep(Duration::from_millis(40));
    }

    assert_eq!(rl.count(), 1);

    rl.stop_cleanup_loop();
}

#[test]
fn test_stop_cleanup_loop_prevents_future_cleanup() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();

    rl.run_cleanup_loop_with_config(20);
    thread::sleep(Duration::from_millis(30));

    // Idempotent stop
    rl.stop_cleanup_loop();
    rl.stop_cleanup_loop();
    assert!(!rl.is_cleanup_loop_running());

    // If the loop were still running, a later tick would sweep the ended window.
    clock.advance(Duration::from_millis(101));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 1);
}

#[test]
fn test_run_cleanup_loop_with_config_is_idempotent() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();
    clock.advance(Duration::from_millis(101));

    // Long interval: the immediate first sweep happens, then nothing for a while.
    rl.decide("key2", &[10, 100]).unwrap();
    rl.run_cleanup_loop_with_config(60_000);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(rl.count(), 1);

    // Second call is a no-op (no reconfiguration, no second loop).
    clock.advance(Duration::from_millis(101));
    rl.run_cleanup_loop_with_config(10);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 1);

    rl.stop_cleanup_loop();
}

#[test]
fn test_stop_then_restart_cleanup_loop_works() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();

    rl.run_cleanup_loop_with_config(20);
    thread::sleep(Duration::from_millis(30));
    rl.stop_cleanup_loop();

    clock.advance(Duration::from_millis(101));
    thread::sleep(Duration::from_millis(60));
    assert_eq!(rl.count(), 1);

    // Restart: the window has ended and the first sweep removes it.
    rl.run_cleanup_loop_with_config(20);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(rl.count(), 0);

    rl.stop_cleanup_loop();
}

#[test]
fn test_run_cleanup_loop_uses_configured_interval() {
    let clock = MockClock::default();
    let rl = RateLimiter::with_clock(
        RateLimiterOptions {
            sweep_interval_ms: SweepIntervalMs::try_from(20u64).unwrap(),
            ..Default::default()
        },
        clock.clone(),
    );

    rl.decide("key1", &[10, 100]).unwrap();
    rl.run_cleanup_loop();
    thread::sleep(Duration::from_millis(30));

    clock.advance(Duration::from_millis(101));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 0);
}

#[test]
fn test_zero_interval_is_raised_to_one_millisecond() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();
    rl.run_cleanup_loop_with_config(0);
    assert!(rl.is_cleanup_loop_running());

    clock.advance(Duration::from_millis(101));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 0);

    rl.stop_cleanup_loop();
}

#[test]
fn test_cleanup_loop_ends_when_limiter_is_dropped() {
    let (rl, _) = limiter();
    let weak = rl.downgrade_local();

    rl.run_cleanup_loop_with_config(10);
    drop(rl);

    thread::sleep(Duration::from_millis(50));
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_cleanup_loop_with_system_clock() {
    let rl = RateLimiter::new(RateLimiterOptions::default());

    rl.decide("key1", &[10, 50]).unwrap();
    rl.decide("key2", &[10, 60_000]).unwrap();
    rl.run_cleanup_loop_with_config(20);

    thread::sleep(Duration::from_millis(200));

    assert_eq!(rl.count(), 1);
    rl.stop_cleanup_loop();
}

#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cleanup_loop_runs_as_tokio_task() {
    let (rl, clock) = limiter();

    rl.decide("key1", &[10, 100]).unwrap();
    rl.run_cleanup_loop_with_config(20);
    assert!(rl.is_cleanup_loop_running());

    clock.advance(Duration::from_millis(101));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rl.count(), 0);

    rl.decide("key2", &[10, 100]).unwrap();
    rl.stop_cleanup_loop();
    assert!(!rl.is_cleanup_loop_running());

    clock.advance(Duration::from_millis(101));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rl.count(), 1);
}

#[cfg(feature = "tokio")]
#[test]
fn test_cleanup_loop_restarts_after_its_runtime_shuts_down() {
    let (rl, clock) = limiter();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(async { rl.run_cleanup_loop_with_config(10) });
    drop(runtime);

    // The task went down with its runtime.
    assert!(!rl.is_cleanup_loop_running());

    rl.decide("key1", &[10, 20]).unwrap();
    clock.advance(Duration::from_millis(50));

    // No runtime in scope now, so the replacement loop runs on a thread.
    rl.run_cleanup_loop_with_config(10);
    assert!(rl.is_cleanup_loop_running());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(rl.count(), 0);

    rl.stop_cleanup_loop();
}
