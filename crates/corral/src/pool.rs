//! The public pool facade.
//!
//! [`Pool`] owns the job queue, the dispatcher task, and the completion
//! counter. Jobs go in through [`Pool::submit`] (or a cloned [`Submitter`]),
//! and [`Pool::release`] tears everything down in order.
//!
//! ```
//! use corral::Pool;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> corral::Result<()> {
//! let pool = Pool::new(4, 16)?;
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! pool.set_expected_completions(100);
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     let done = pool.completion();
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!         let _ = done.done();
//!     })
//!     .await?;
//! }
//!
//! pool.await_all().await;
//! assert_eq!(counter.load(Ordering::Relaxed), 100);
//! pool.release().await
//! # }
//! ```

use crate::{
    Completion, Error, Job, PoolConfig, Result, StatsSnapshot,
    dispatcher::{Dispatcher, ReleaseAck, Submission},
    stats::PoolStats,
    worker::IdleWorker,
};
use core::{fmt, time::Duration};
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::Instant,
};

/// Cloneable handle for submitting jobs to a [`Pool`].
///
/// Useful for submitting from other tasks, or from inside a job body via
/// [`blocking_submit`](Self::blocking_submit). Once the pool is released
/// every submission fails with [`Error::Released`].
#[derive(Clone)]
pub struct Submitter {
    queue: mpsc::Sender<Submission>,
    rendezvous: bool,
}

impl Submitter {
    fn wrap(&self, job: Job) -> (Submission, Option<oneshot::Receiver<()>>) {
        if self.rendezvous {
            let (tx, rx) = oneshot::channel();
            let submission = Submission {
                job,
                taken: Some(tx),
            };
            (submission, Some(rx))
        } else {
            (Submission { job, taken: None }, None)
        }
    }

    /// Submits a closure as a job. See [`submit_job`](Self::submit_job).
    pub async fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_job(Job::new(f)).await
    }

    /// Enqueues `job`, waiting while the queue is full.
    ///
    /// With a zero-capacity queue this returns only once the dispatcher has
    /// taken the job. There is no upper bound on the wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Released`] if the pool is shutting down or gone.
    pub async fn submit_job(&self, job: Job) -> Result<()> {
        let (submission, taken) = self.wrap(job);
        self.queue
            .send(submission)
            .await
            .map_err(|_| Error::Released)?;

        match taken {
            Some(taken) => taken.await.map_err(|_| Error::Released),
            None => Ok(()),
        }
    }

    /// Enqueues a job only if there is room right now.
    ///
    /// On a zero-capacity queue this succeeds when the hand-off slot is free
    /// and does not wait for the dispatcher to take the job.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueFull`] if the queue is at capacity.
    /// - [`Error::Released`] if the pool is shutting down or gone.
    pub fn try_submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let submission = Submission {
            job: Job::new(f),
            taken: None,
        };
        self.queue.try_send(submission).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::Released,
        })
    }

    /// Like [`submit`](Self::submit), bounded by `timeout`.
    ///
    /// A job counts as submitted once it is in the queue. On a zero-capacity
    /// queue that means the hand-off slot: if the dispatcher has not taken
    /// the job when `timeout` fires, this still returns `Ok(())` and the job
    /// still runs.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the job was not queued in time. The job is
    ///   dropped without running.
    /// - [`Error::Released`] if the pool is shutting down or gone.
    pub async fn submit_timeout<F>(&self, f: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let (submission, taken) = self.wrap(Job::new(f));

        tokio::time::timeout_at(deadline, self.queue.send(submission))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::Released)?;

        if let Some(taken) = taken {
            if let Ok(res) = tokio::time::timeout_at(deadline, taken).await {
                res.map_err(|_| Error::Released)?;
            }
        }
        Ok(())
    }

    /// Blocking variant of [`submit`](Self::submit) for synchronous code,
    /// such as a job body submitting follow-up work.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context, like
    /// [`mpsc::Sender::blocking_send`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Released`] if the pool is shutting down or gone.
    pub fn blocking_submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (submission, taken) = self.wrap(Job::new(f));
        self.queue
            .blocking_send(submission)
            .map_err(|_| Error::Released)?;

        match taken {
            Some(taken) => taken.blocking_recv().map_err(|_| Error::Released),
            None => Ok(()),
        }
    }

    /// Jobs currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }
}

impl fmt::Debug for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submitter")
            .field("queued", &self.queued())
            .field("rendezvous", &self.rendezvous)
            .finish()
    }
}

/// A fixed-size pool of workers fed from a bounded job queue.
///
/// All workers and the dispatcher are spawned on the current tokio runtime
/// when the pool is built, and live until [`release`](Self::release). At
/// most `worker_count` jobs run at the same time; jobs are handed out in
/// submission order.
pub struct Pool {
    config: PoolConfig,
    submitter: Submitter,
    stop: oneshot::Sender<ReleaseAck>,
    dispatcher: JoinHandle<()>,
    registry: mpsc::Sender<IdleWorker>,
    completion: Completion,
    stats: Arc<PoolStats>,
}

impl Pool {
    /// Builds a pool with `worker_count` workers and room for
    /// `queue_capacity` waiting jobs.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `worker_count` is zero.
    /// - [`Error::NoRuntime`] if called outside a tokio runtime.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(worker_count, queue_capacity)?)
    }

    /// Builds a pool from a validated [`PoolConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside a tokio runtime.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let stats = Arc::new(PoolStats::default());

        // tokio channels need a non-zero buffer; a zero-capacity queue is a
        // one-slot channel where every submitter waits for the hand-off.
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();

        let (dispatcher, registry) =
            Dispatcher::new(config.worker_count, queue_rx, stop_rx, &stats, &runtime);
        let dispatcher = dispatcher.spawn(&runtime);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Pool started with {} workers and queue capacity {}",
            config.worker_count,
            config.queue_capacity
        );

        Ok(Self {
            config,
            submitter: Submitter {
                queue: queue_tx,
                rendezvous: config.queue_capacity == 0,
            },
            stop: stop_tx,
            dispatcher,
            registry,
            completion: Completion::new(),
            stats,
        })
    }

    /// Submits a closure as a job, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Released`] if the pool is shutting down.
    pub async fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitter.submit(f).await
    }

    /// Submits a prebuilt [`Job`], waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Released`] if the pool is shutting down.
    pub async fn submit_job(&self, job: Job) -> Result<()> {
        self.submitter.submit_job(job).await
    }

    /// # Errors
    ///
    /// See [`Submitter::try_submit`].
    pub fn try_submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitter.try_submit(f)
    }

    /// # Errors
    ///
    /// See [`Submitter::submit_timeout`].
    pub async fn submit_timeout<F>(&self, f: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitter.submit_timeout(f, timeout).await
    }

    /// Returns a cloneable submission handle.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Stops the pool and waits until every worker has terminated.
    ///
    /// Jobs already queued are dispatched first, then workers are stopped
    /// one at a time, each after finishing whatever it was running. Taking
    /// `self` makes a second release impossible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the dispatcher task died instead
    /// of acknowledging.
    pub async fn release(self) -> Result<()> {
        let Self {
            stop, dispatcher, ..
        } = self;

        #[cfg(feature = "tracing")]
        tracing::debug!("Releasing pool");

        let (ack_tx, ack_rx) = oneshot::channel();
        stop.send(ack_tx).map_err(|_| Error::ChannelError {
            context: "dispatcher exited before release".to_string(),
        })?;

        ack_rx.await.map_err(|_| Error::ChannelError {
            context: "dispatcher exited without acknowledging release".to_string(),
        })?;

        dispatcher.await.map_err(|e| Error::ChannelError {
            context: format!("dispatcher task failed: {e}"),
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Pool released");

        Ok(())
    }

    /// Like [`release`](Self::release), bounded by `timeout`.
    ///
    /// If the timeout fires, teardown keeps going in the background.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if teardown did not finish in time.
    /// - Any error from [`release`](Self::release).
    pub async fn release_timeout(self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.release())
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Records `n` more expected completions. Calls are additive.
    pub fn set_expected_completions(&self, n: usize) {
        self.completion.add(n);
    }

    /// Signals one completion. Jobs usually do this through a handle from
    /// [`completion`](Self::completion).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CompletionUnderflow`] if nothing is outstanding.
    pub fn mark_one_complete(&self) -> Result<()> {
        self.completion.done()
    }

    /// Waits until every expected completion has been signalled.
    pub async fn await_all(&self) {
        self.completion.wait().await;
    }

    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if completions are still outstanding when
    /// `timeout` elapses.
    pub async fn await_all_timeout(&self, timeout: Duration) -> Result<()> {
        self.completion.wait_timeout(timeout).await
    }

    /// Returns a handle to this pool's completion counter, for job bodies.
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.stats.active(),
            completed: self.stats.completed(),
            panicked: self.stats.panicked(),
            idle_workers: self.registry.max_capacity() - self.registry.capacity(),
            queued: self.submitter.queued(),
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("completion", &self.completion)
            .finish()
    }
}
