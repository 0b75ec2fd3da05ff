use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tierlimit::{
    KeyPrefix, RateLimiter, RateLimiterOptions, SweepIntervalMs, Tier, TierLimitError,
};

fn eventually<F>(timeout: Duration, poll: Duration, mut f: F)
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if f() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("condition not met within {timeout:?}");
        }
        thread::sleep(poll);
    }
}

#[test]
fn default_options_report_quota_window_and_reset() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "defaults";

    let before = Instant::now();
    let decision = rl.decide(id, &[10, 1000]).unwrap();

    assert_eq!(decision.total, 10);
    assert_eq!(decision.remaining, 9);
    assert_eq!(decision.window, Duration::from_millis(1000));
    assert!(decision.reset_at > before);

    assert_eq!(rl.decide(id, &[10, 1000]).unwrap().remaining, 8);
}

#[test]
fn empty_policy_uses_default_tier() {
    let rl = RateLimiter::new(RateLimiterOptions::default());

    let decision = rl.decide("empty", &[]).unwrap();

    assert_eq!(decision.total, 1000);
    assert_eq!(decision.remaining, 999);
    assert_eq!(decision.window, Duration::from_secs(60));
}

#[test]
fn window_expires_in_real_time() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "expire";

    let seen: Vec<i64> = (0..4)
        .map(|_| rl.decide(id, &[3, 100]).unwrap().remaining)
        .collect();
    assert_eq!(seen, vec![2, 1, 0, -1]);

    thread::sleep(Duration::from_millis(101));

    assert_eq!(rl.decide(id, &[3, 100]).unwrap().remaining, 2);
}

#[test]
fn multi_tier_policy_escalates_after_exhaustion() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "multi";
    let tiers = [3, 100, 2, 200];

    let seen: Vec<i64> = (0..5)
        .map(|_| rl.decide(id, &tiers).unwrap().remaining)
        .collect();
    assert_eq!(seen, vec![2, 1, 0, -1, -1]);

    let last = rl.decide(id, &tiers).unwrap();
    assert!(last.reset_at > Instant::now());
    thread::sleep(last.window + Duration::from_millis(1));

    let decision = rl.decide(id, &tiers).unwrap();
    assert_eq!((decision.total, decision.remaining, decision.tier), (2, 1, 2));
}

#[test]
fn concurrent_requests_exhaust_quota() {
    let rl = Arc::new(RateLimiter::new(RateLimiterOptions::default()));
    let id = "burst";

    assert_eq!(rl.decide(id, &[10, 5000]).unwrap().remaining, 9);

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let rl = Arc::clone(&rl);
            thread::spawn(move || {
                rl.decide(id, &[10, 5000]).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let decision = rl.decide(id, &[10, 5000]).unwrap();
    assert_eq!(decision.total, 10);
    assert_eq!(decision.remaining, -1);
}

#[test]
fn remove_resets_identifier() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "remove";

    assert_eq!(rl.decide(id, &[10, 1000]).unwrap().remaining, 9);
    rl.remove(&id);
    assert_eq!(rl.decide(id, &[10, 1000]).unwrap().remaining, 9);
}

#[test]
fn wrong_policy_is_an_error() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "wrong";

    assert!(matches!(
        rl.decide(id, &[10, 1000, 1]),
        Err(TierLimitError::InvalidPolicy(_))
    ));
    assert!(matches!(
        rl.decide(id, &[-1, 10]),
        Err(TierLimitError::InvalidPolicy(_))
    ));
    assert!(matches!(
        rl.decide(id, &[10, 0]),
        Err(TierLimitError::InvalidPolicy(_))
    ));
    assert_eq!(rl.count(), 0);
}

#[test]
fn manual_cleanup_then_decide() {
    let rl = RateLimiter::new(RateLimiterOptions::default());
    let id = "clean";

    for _ in 0..2 {
        let decision = rl.decide(id, &[10, 100]).unwrap();
        assert_eq!((decision.total, decision.remaining), (10, 9));

        thread::sleep(decision.window + Duration::from_millis(1));
        assert_eq!(rl.cleanup(), 1);
    }
}

#[test]
fn background_sweep_keeps_count_in_check() {
    let rl = RateLimiter::new(RateLimiterOptions {
        key_prefix: KeyPrefix::try_from("itest:").unwrap(),
        default_tier: Tier::new(100, 50).unwrap(),
        sweep_interval_ms: SweepIntervalMs::try_from(20u64).unwrap(),
    });

    rl.decide("1", &[]).unwrap();
    rl.decide("2", &[]).unwrap();
    assert_eq!(rl.count(), 2);

    rl.run_cleanup_loop();
    eventually(Duration::from_secs(2), Duration::from_millis(10), || {
        rl.count() == 0
    });

    rl.stop_cleanup_loop();
}
