//! Job-to-worker matching and ordered teardown.
//!
//! The [`Dispatcher`] owns the receiving ends of the job queue and the
//! idle-worker registry. For every queued job it pops the next idle worker
//! (waiting for one if all are busy) and moves the job into that worker's
//! slot. While it waits for a worker the queue fills up, which is what
//! eventually makes `submit` block.
//!
//! On a stop request it closes the queue, dispatches whatever was already
//! buffered, then stops the workers one at a time: signal, wait for the
//! acknowledgment, join the task, and only then move to the next worker.

use crate::{
    Error, Job, Result,
    stats::PoolStats,
    worker::{IdleWorker, Worker, WorkerId},
};
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Acknowledgment sent back to the pool once every worker has stopped.
pub(crate) type ReleaseAck = oneshot::Sender<()>;

/// A queued job.
///
/// `taken` is set for rendezvous submissions (zero-capacity queues) and is
/// signalled as soon as the dispatcher pulls the job off the queue.
#[derive(Debug)]
pub(crate) struct Submission {
    pub(crate) job: Job,
    pub(crate) taken: Option<oneshot::Sender<()>>,
}

pub(crate) struct Dispatcher {
    registry: mpsc::Receiver<IdleWorker>,
    queue: mpsc::Receiver<Submission>,
    stop: oneshot::Receiver<ReleaseAck>,
    workers: Vec<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates the idle-worker registry and spawns `worker_count` workers
    /// into it.
    ///
    /// Returns the dispatcher along with a registry sender the caller can
    /// use to observe how many workers are idle.
    pub(crate) fn new(
        worker_count: usize,
        queue: mpsc::Receiver<Submission>,
        stop: oneshot::Receiver<ReleaseAck>,
        stats: &Arc<PoolStats>,
        runtime: &Handle,
    ) -> (Self, mpsc::Sender<IdleWorker>) {
        let (registry_tx, registry_rx) = mpsc::channel(worker_count);
        let shutdown = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|i| {
                let worker = Worker::new(
                    WorkerId::from(i),
                    registry_tx.clone(),
                    Arc::clone(stats),
                    shutdown.clone(),
                );
                Some(worker.spawn(runtime))
            })
            .collect();

        let dispatcher = Self {
            registry: registry_rx,
            queue,
            stop,
            workers,
            shutdown,
        };
        (dispatcher, registry_tx)
    }

    pub(crate) fn spawn(self, runtime: &Handle) -> JoinHandle<()> {
        runtime.spawn(self.run())
    }

    async fn run(mut self) {
        // Whatever happens below, no worker may stay parked once the
        // dispatcher is gone.
        let _cancel_workers = self.shutdown.clone().drop_guard();

        let ack = loop {
            tokio::select! {
                Some(submission) = self.queue.recv() => {
                    if let Err(_e) = self.dispatch(submission).await {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Dispatch failed: {_e}");
                        break None;
                    }
                }
                ack = &mut self.stop => {
                    // An error here means the pool was dropped without being
                    // released; tear down anyway, with nobody to notify.
                    break ack.ok();
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher stopping {} workers", self.workers.len());

        self.drain().await;
        self.stop_workers().await;

        if let Some(ack) = ack {
            if ack.send(()).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Pool stopped waiting for the release acknowledgment");
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher stopped");
    }

    /// Moves one job to the next idle worker, waiting for one if needed.
    async fn dispatch(&mut self, submission: Submission) -> Result<()> {
        let Submission { job, taken } = submission;
        if let Some(taken) = taken {
            // The submitter may have given up waiting; the job still runs.
            let _ = taken.send(());
        }

        let worker = self
            .registry
            .recv()
            .await
            .ok_or_else(|| Error::ChannelError {
                context: "idle-worker registry closed".to_string(),
            })?;

        #[cfg(feature = "tracing")]
        tracing::trace!("Dispatching job to worker {}", worker.id());

        worker.assign(job).await
    }

    /// Closes the queue and dispatches everything already buffered in it.
    async fn drain(&mut self) {
        self.queue.close();

        #[cfg(feature = "tracing")]
        tracing::debug!("Draining {} queued jobs", self.queue.len());

        while let Some(submission) = self.queue.recv().await {
            if let Err(_e) = self.dispatch(submission).await {
                #[cfg(feature = "tracing")]
                tracing::error!("Dropping queued jobs, dispatch failed: {_e}");
                break;
            }
        }
    }

    /// Stops every worker, strictly one after another.
    ///
    /// Busy workers are stopped once they finish their job and re-register;
    /// nothing in flight is interrupted.
    async fn stop_workers(&mut self) {
        for _ in 0..self.workers.len() {
            let Some(worker) = self.registry.recv().await else {
                #[cfg(feature = "tracing")]
                tracing::error!("Idle-worker registry closed before all workers stopped");
                return;
            };

            let id = worker.id();
            if let Err(_e) = worker.stop().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to stop worker {id}: {_e}");
                continue;
            }

            let task = self.workers.get_mut(id.index()).and_then(Option::take);
            if let Some(task) = task {
                if let Err(_e) = task.await {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {id} task failed: {_e}");
                }
            }

            #[cfg(feature = "tracing")]
            tracing::trace!("Worker {id} shutdown acknowledged");
        }
    }
}
