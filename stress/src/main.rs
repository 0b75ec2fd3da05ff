use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use tierlimit::{RateLimiter, RateLimiterOptions, SweepIntervalMs, TierPolicy};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
    Skewed,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Mode {
    Max,
    TargetQps,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tierlimit-stress",
    about = "Load test / benchmark harness for tierlimit"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = KeyDist::Hot)]
    key_dist: KeyDist,

    #[arg(long, value_enum, default_value_t = Mode::Max)]
    mode: Mode,

    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 60)]
    duration_s: u64,

    /// Flat `quota,window_ms[,quota,window_ms...]` tier list.
    #[arg(long, value_delimiter = ',', default_value = "1000,1000,100,2000")]
    tiers: Vec<i64>,

    #[arg(long, default_value_t = 1000)]
    sweep_interval_ms: u64,

    #[arg(long, default_value_t = 100000)]
    key_space: usize,

    #[arg(long, default_value_t = 0.8)]
    hot_fraction: f64,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    #[arg(long)]
    target_qps: Option<u64>,
}

#[derive(Default)]
struct Counts {
    allowed: AtomicU64,
    rejected: AtomicU64,
    escalated: AtomicU64,
}

fn build_keys(args: &Args) -> Vec<String> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        _ => args.key_space.max(1),
    };
    (0..n).map(|i| format!("user_{i}")).collect()
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

fn pick_key<'a>(args: &Args, keys: &'a [String], thread_rng: &mut impl FnMut() -> u64) -> &'a str {
    match args.key_dist {
        KeyDist::Hot => &keys[0],
        KeyDist::Uniform => {
            let idx = (thread_rng() as usize) % keys.len();
            &keys[idx]
        }
        KeyDist::Skewed => {
            let r = (thread_rng() % 10_000) as f64 / 10_000.0;
            if r < args.hot_fraction {
                &keys[0]
            } else {
                let idx = 1 + ((thread_rng() as usize) % (keys.len().saturating_sub(1).max(1)));
                &keys[idx % keys.len()]
            }
        }
    }
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    ops: u64,
    hist: &Histogram<u64>,
    counts: &Counts,
    rl: &RateLimiter,
) {
    println!("mode={:?} tiers={:?}", args.mode, args.tiers);
    println!(
        "threads={} duration_s={} key_dist={:?} key_space={}",
        args.threads, args.duration_s, args.key_dist, args.key_space
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops as f64 / elapsed.as_secs_f64()
    );
    println!(
        "allowed={} rejected={} escalated_decisions={}",
        counts.allowed.load(Ordering::Relaxed),
        counts.rejected.load(Ordering::Relaxed),
        counts.escalated.load(Ordering::Relaxed),
    );
    println!(
        "tracked_windows={} tracked_escalations={}",
        rl.count(),
        rl.local().escalation_count()
    );
    if !hist.is_empty() {
        println!(
            "lat_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
        println!("sample_every={} samples={}", args.sample_every, hist.len());
    } else {
        println!("no latency samples collected");
    }
}

fn run(args: &Args, policy: TierPolicy) -> Result<(), Box<dyn std::error::Error>> {
    let keys = Arc::new(build_keys(args));
    let policy = Arc::new(policy);

    let rl = Arc::new(RateLimiter::new(RateLimiterOptions {
        sweep_interval_ms: SweepIntervalMs::try_from(args.sweep_interval_ms)?,
        ..Default::default()
    }));

    tracing::info!(
        threads = args.threads,
        duration_s = args.duration_s,
        key_dist = ?args.key_dist,
        tiers = policy.len(),
        "stress run starting"
    );
    rl.run_cleanup_loop();

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new(Counts::default());
    let total_ops = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration_s);

    let mut handles = Vec::with_capacity(args.threads);
    for t in 0..args.threads {
        let rl = Arc::clone(&rl);
        let keys = Arc::clone(&keys);
        let policy = Arc::clone(&policy);
        let stop = Arc::clone(&stop);
        let counts = Arc::clone(&counts);
        let total_ops = Arc::clone(&total_ops);
        let args = args.clone();

        handles.push(std::thread::spawn(move || {
            let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
                .expect("valid histogram bounds");
            let mut i = 0_u64;
            let mut seed = (t as u64 + 1) * 0x9E37_79B9_7F4A_7C15;
            let mut next_deadline = Instant::now();

            let mut rng_u64 = || {
                // xorshift64*
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                seed = seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
                seed
            };

            while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
                if args.mode == Mode::TargetQps
                    && let Some(qps) = args.target_qps
                {
                    let per_thread_qps = (qps / args.threads.max(1) as u64).max(1);
                    let now = Instant::now();
                    if now < next_deadline {
                        std::thread::sleep(next_deadline - now);
                    }
                    next_deadline += Duration::from_nanos(1_000_000_000 / per_thread_qps);
                }

                i = i.wrapping_add(1);
                let k = pick_key(&args, &keys, &mut rng_u64);
                let t0 = should_sample(i, args.sample_every).then(Instant::now);

                let decision = rl.decide_with_policy(k, &policy);

                if let Some(t0) = t0 {
                    let us = t0.elapsed().as_micros() as u64;
                    let _ = hist.record(us.max(1));
                }

                total_ops.fetch_add(1, Ordering::Relaxed);
                if decision.is_allowed() {
                    counts.allowed.fetch_add(1, Ordering::Relaxed);
                } else {
                    counts.rejected.fetch_add(1, Ordering::Relaxed);
                }
                if decision.tier > 1 {
                    counts.escalated.fetch_add(1, Ordering::Relaxed);
                }
            }

            hist
        }));
    }

    std::thread::sleep(Duration::from_secs(args.duration_s));
    stop.store(true, Ordering::Relaxed);

    let mut merged = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    for h in handles {
        let hist = h.join().map_err(|_| "worker thread panicked")?;
        merged.add(&hist)?;
    }

    rl.stop_cleanup_loop();

    let elapsed = started.elapsed();
    let ops = total_ops.load(Ordering::Relaxed);
    tracing::info!(ops, elapsed_ms = elapsed.as_millis() as u64, "stress run finished");
    print_results(args, elapsed, ops, &merged, &counts, &rl);

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let policy = match TierPolicy::try_from(args.tiers.as_slice()) {
        Ok(policy) => policy,
        Err(err) => {
            tracing::error!(error = %err, "invalid --tiers");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(&args, policy) {
        tracing::error!(error = %err, "stress run failed");
        std::process::exit(1);
    }
}
