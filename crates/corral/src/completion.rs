//! Batch completion tracking.
//!
//! [`Completion`] is a cloneable counter of outstanding completions. Callers
//! announce how many completions to expect with [`Completion::add`], jobs
//! signal with [`Completion::done`] (or drop a [`CompletionGuard`]), and any
//! number of tasks can [`Completion::wait`] for the count to reach zero.

use crate::{Error, Result};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Inner {
    remaining: AtomicUsize,
    notify: Notify,
}

/// Shared handle to a pool's completion counter.
///
/// Cloning is cheap; every clone observes the same counter. The counter is
/// safe to update concurrently from many workers.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                remaining: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Records `n` more pending completions. Calls are additive.
    pub fn add(&self, n: usize) {
        self.inner.remaining.fetch_add(n, Ordering::AcqRel);
    }

    /// Signals one completion.
    ///
    /// Waking waiters happens when the count transitions to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CompletionUnderflow`] if no completions are
    /// outstanding. The counter stays at zero.
    pub fn done(&self) -> Result<()> {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| Error::CompletionUnderflow)?;

        if previous == 1 {
            self.inner.notify.notify_waiters();
        }
        Ok(())
    }

    /// Number of completions still outstanding.
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Waits until the outstanding count reaches zero.
    ///
    /// Returns immediately if nothing is outstanding. If fewer completions
    /// are signalled than were announced, this never returns.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a transition to zero
            // between the load and the await is not missed.
            notified.as_mut().enable();

            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Like [`wait`](Self::wait), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the count has not reached zero in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::Timeout)
    }

    /// Returns a guard that signals one completion when dropped.
    ///
    /// Holding the guard inside a job body guarantees the completion is
    /// signalled even if the job panics.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            completion: self.clone(),
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Signals one completion on drop. See [`Completion::guard`].
#[must_use = "the completion is signalled when the guard is dropped"]
#[derive(Debug)]
pub struct CompletionGuard {
    completion: Completion,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Err(_e) = self.completion.done() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Completion guard dropped with nothing outstanding: {_e}");
        }
    }
}
