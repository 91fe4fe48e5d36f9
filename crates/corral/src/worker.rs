//! Worker tasks.
//!
//! A worker is a tokio task that loops through three states:
//!
//! - **Idle**: it pushes an [`IdleWorker`] handle for itself into the shared
//!   idle-worker registry.
//! - **Waiting**: it selects between its private job slot and its private
//!   stop channel.
//! - **Busy**: it runs the assigned [`Job`] on the blocking thread pool and
//!   awaits it, then goes back to idle.
//!
//! A stop message carries a oneshot sender; the worker acknowledges through
//! it and exits without re-registering.

use crate::{Error, Job, Result, stats::PoolStats};
use core::fmt;
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Worker id. Unique within a pool, assigned in spawn order from zero.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct WorkerId(usize);

impl WorkerId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for WorkerId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Acknowledgment channel handed to a worker along with its stop signal.
pub(crate) type StopAck = oneshot::Sender<()>;

/// Registry entry for a worker that is ready for work.
///
/// Each entry is good for exactly one assignment: either a job or a stop.
#[derive(Clone)]
pub(crate) struct IdleWorker {
    id: WorkerId,
    jobs: mpsc::Sender<Job>,
    stop: mpsc::Sender<StopAck>,
}

impl IdleWorker {
    /// Creates the registry handle for worker `id` together with the
    /// receiving ends of its job slot and stop channel.
    ///
    /// Both channels hold a single message: a worker never has more than one
    /// assignment outstanding.
    pub(crate) fn new(id: WorkerId) -> (Self, mpsc::Receiver<Job>, mpsc::Receiver<StopAck>) {
        let (job_tx, job_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let handle = Self {
            id,
            jobs: job_tx,
            stop: stop_tx,
        };
        (handle, job_rx, stop_rx)
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Hands `job` to this worker.
    ///
    /// The worker registered itself before waiting on its slot, so the slot
    /// is empty and the send completes without waiting on a running job.
    pub(crate) async fn assign(&self, job: Job) -> Result<()> {
        self.jobs.send(job).await.map_err(|_| Error::ChannelError {
            context: format!("Worker {} job channel closed", self.id),
        })
    }

    /// Signals this worker to stop and waits for its acknowledgment.
    pub(crate) async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.stop.send(tx).await.map_err(|_| Error::ChannelError {
            context: format!("Worker {} stop channel closed", self.id),
        })?;
        rx.await.map_err(|_| Error::ChannelError {
            context: format!("Worker {} dropped its stop acknowledgment", self.id),
        })
    }
}

impl fmt::Debug for IdleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdleWorker").field(&self.id).finish()
    }
}

pub(crate) struct Worker {
    id: WorkerId,
    registry: mpsc::Sender<IdleWorker>,
    handle: IdleWorker,
    jobs: mpsc::Receiver<Job>,
    stop: mpsc::Receiver<StopAck>,
    stats: Arc<PoolStats>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Creates a worker with its private job slot and stop channel.
    pub(crate) fn new(
        id: WorkerId,
        registry: mpsc::Sender<IdleWorker>,
        stats: Arc<PoolStats>,
        shutdown: CancellationToken,
    ) -> Self {
        let (handle, jobs, stop) = IdleWorker::new(id);

        Self {
            id,
            registry,
            handle,
            jobs,
            stop,
            stats,
            shutdown,
        }
    }

    /// Launches the worker loop as an independent task on `runtime`.
    pub(crate) fn spawn(self, runtime: &Handle) -> JoinHandle<()> {
        runtime.spawn(self.run())
    }

    async fn run(mut self) {
        let _id = self.id;

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {_id} started");

        loop {
            let registered = tokio::select! {
                res = self.registry.send(self.handle.clone()) => res.is_ok(),
                () = self.shutdown.cancelled() => false,
            };
            if !registered {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {_id} lost its dispatcher, exiting");
                break;
            }

            tokio::select! {
                Some(job) = self.jobs.recv() => self.execute(job).await,
                Some(ack) = self.stop.recv() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {_id} received stop signal");

                    if ack.send(()).is_err() {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Worker {_id} failed to acknowledge stop");
                    }
                    break;
                }
                () = self.shutdown.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {_id} cancelled while waiting");
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {_id} stopped");
    }

    /// Runs `job` on the blocking pool and waits for it.
    ///
    /// A panicking job is contained here: the worker records it and goes on
    /// serving, so the pool keeps its full capacity.
    async fn execute(&self, job: Job) {
        self.stats.job_started();

        match tokio::task::spawn_blocking(move || job.run()).await {
            Ok(()) => self.stats.job_completed(),
            Err(e) if e.is_panic() => {
                self.stats.job_panicked();

                #[cfg(feature = "tracing")]
                tracing::warn!("Job panicked in worker {}: {e}", self.id);
            }
            Err(_e) => {
                self.stats.job_abandoned();

                #[cfg(feature = "tracing")]
                tracing::warn!("Job abandoned in worker {}: {_e}", self.id);
            }
        }
    }
}
