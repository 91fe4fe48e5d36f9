use portable_atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared between the pool facade and its workers.
///
/// `u64` counters go through `portable-atomic` so they stay lock-free on
/// targets without native 64-bit atomics.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    active: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolStats {
    pub(crate) fn job_started(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn job_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// The blocking task was cancelled by runtime shutdown before it ran.
    pub(crate) fn job_abandoned(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a pool's activity.
///
/// Fields are read independently and may be mutually inconsistent while
/// jobs are running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Jobs currently executing.
    pub active: usize,
    /// Jobs that ran to completion.
    pub completed: u64,
    /// Jobs that panicked. Their workers kept serving.
    pub panicked: u64,
    /// Workers currently registered as idle.
    pub idle_workers: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
}
