mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, RunnerConfig};
use core::time::Duration;
use corral::{Pool, StatsSnapshot};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention: every submission
// boxes a closure that is freed on a blocking-pool thread.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Upper bound on teardown after an interrupted run.
const INTERRUPTED_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunnerConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let pool = Pool::with_config(config.pool)?;
    let probe = Arc::new(ConcurrencyProbe::default());
    let start = Instant::now();

    tokio::select! {
        res = drive(&pool, &config, &probe) => res?,
        () = shutdown_signal() => {
            tracing::warn!(
                "Interrupted with {} completions outstanding, releasing pool",
                pool.completion().remaining()
            );
            pool.release_timeout(INTERRUPTED_RELEASE_TIMEOUT).await?;
            return Ok(());
        }
    }

    let elapsed = start.elapsed();
    let stats = pool.stats();
    pool.release().await?;

    log_report(&config, elapsed, probe.peak(), stats);
    Ok(())
}

/// Submits every job and waits for all of them to complete.
async fn drive(
    pool: &Pool,
    config: &RunnerConfig,
    probe: &Arc<ConcurrencyProbe>,
) -> anyhow::Result<()> {
    pool.set_expected_completions(config.jobs);

    let submitters = (0..config.submitters).map(|s| {
        let submitter = pool.submitter();
        let completion = pool.completion();
        let probe = Arc::clone(probe);
        let jobs = config.jobs_for(s);
        let job_duration = config.job_duration;

        async move {
            for _ in 0..jobs {
                let probe = Arc::clone(&probe);
                let done = completion.guard();
                submitter
                    .submit(move || {
                        let _done = done;
                        probe.enter();
                        if !job_duration.is_zero() {
                            std::thread::sleep(job_duration);
                        }
                        probe.exit();
                    })
                    .await?;
            }

            tracing::debug!("Submitter {s} queued {jobs} jobs");
            Ok::<_, corral::Error>(())
        }
    });

    futures::future::try_join_all(submitters).await?;
    pool.await_all().await;
    Ok(())
}

/// Tracks how many jobs run at once, and the highest value seen.
#[derive(Default)]
struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

fn log_startup_info(config: &RunnerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting runner with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting runner: {} jobs on {} workers",
            config.jobs,
            config.pool.worker_count
        );
    }
}

fn log_report(config: &RunnerConfig, elapsed: Duration, peak: usize, stats: StatsSnapshot) {
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        config.jobs as f64 / secs
    } else {
        f64::INFINITY
    };

    tracing::info!(
        jobs = config.jobs,
        workers = config.pool.worker_count,
        queue_capacity = config.pool.queue_capacity,
        submitters = config.submitters,
        elapsed_ms = elapsed.as_millis() as u64,
        jobs_per_sec = throughput,
        peak_concurrency = peak,
        completed = stats.completed,
        panicked = stats.panicked,
        "Run complete"
    );

    if peak > config.pool.worker_count {
        tracing::error!(
            "Observed {peak} concurrent jobs with only {} workers",
            config.pool.worker_count
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
