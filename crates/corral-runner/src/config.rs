use anyhow::bail;
use clap::Parser;
use corral::PoolConfig;
use core::time::Duration;

/// Runtime configuration for the `corral-runner` binary.
///
/// Controls the pool sizing and the synthetic load pushed through it. All
/// values are parsed from CLI arguments or environment variables (a `.env`
/// file is honored).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "corral-runner",
    version,
    about = "Drive a corral worker pool with a synthetic batch of jobs"
)]
pub struct CliArgs {
    /// Number of workers in the pool, i.e. the maximum number of jobs
    /// running at once. Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `CORRAL_WORKERS`
    #[arg(long, env = "CORRAL_WORKERS")]
    pub workers: Option<usize>,

    /// Capacity of the job queue. Submitters block once this many jobs are
    /// waiting for a worker. Zero makes every submission a hand-off.
    ///
    /// Environment variable: `CORRAL_QUEUE_CAPACITY`
    #[arg(long, env = "CORRAL_QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Total number of jobs to submit.
    ///
    /// Environment variable: `CORRAL_JOBS`
    #[arg(long, env = "CORRAL_JOBS", default_value_t = 10_000)]
    pub jobs: usize,

    /// Simulated work per job, in microseconds. The job sleeps its thread
    /// for this long.
    ///
    /// Environment variable: `CORRAL_JOB_MICROS`
    #[arg(long, env = "CORRAL_JOB_MICROS", default_value_t = 0)]
    pub job_micros: u64,

    /// Number of concurrent tasks submitting jobs. Jobs are split evenly
    /// between them.
    ///
    /// Environment variable: `CORRAL_SUBMITTERS`
    #[arg(long, env = "CORRAL_SUBMITTERS", default_value_t = 1)]
    pub submitters: usize,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub pool: PoolConfig,
    pub jobs: usize,
    pub job_duration: Duration,
    pub submitters: usize,
}

impl TryFrom<CliArgs> for RunnerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let workers = args.workers.unwrap_or_else(num_cpus::get);

        if workers == 0 {
            bail!("CORRAL_WORKERS must be greater than 0");
        }

        if args.jobs == 0 {
            bail!("CORRAL_JOBS must be greater than 0");
        }

        if args.submitters == 0 {
            bail!("CORRAL_SUBMITTERS must be greater than 0");
        }

        if args.submitters > args.jobs {
            bail!(
                "CORRAL_SUBMITTERS ({}) exceeds CORRAL_JOBS ({})",
                args.submitters,
                args.jobs
            );
        }

        let pool = PoolConfig::builder()
            .worker_count(workers)
            .queue_capacity(args.queue_capacity)
            .build()?;

        Ok(Self {
            pool,
            jobs: args.jobs,
            job_duration: Duration::from_micros(args.job_micros),
            submitters: args.submitters,
        })
    }
}

impl RunnerConfig {
    /// Number of jobs the given submitter is responsible for. The remainder
    /// of an uneven split goes to the first submitters.
    pub fn jobs_for(&self, submitter: usize) -> usize {
        let base = self.jobs / self.submitters;
        let extra = usize::from(submitter < self.jobs % self.submitters);
        base + extra
    }
}
