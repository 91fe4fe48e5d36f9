//! Error types for the worker pool.
//!
//! The pool itself is mostly infallible: jobs are opaque and report their
//! own failures. Errors surface only at the edges, when a submission
//! cannot be accepted, when a bounded-time operation gives up, or when the
//! completion counter is misused.
//!
//! ## Error Cases
//! - `InvalidConfig`: the pool configuration was rejected at build time.
//! - `NoRuntime`: the pool was constructed outside a tokio runtime.
//! - `Released`: a submission arrived after the pool started shutting down.
//! - `QueueFull`: a non-blocking submission found the job queue at capacity.
//! - `Timeout`: a bounded-time operation did not complete in time.
//! - `CompletionUnderflow`: more completions were signalled than expected.
//! - `ChannelError`: an internal channel closed unexpectedly.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the worker pool.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The configuration could not be used to build a pool.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No tokio runtime was available to spawn the pool's tasks on.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The pool has been released and no longer accepts jobs.
    #[error("Pool has been released")]
    Released,

    /// The job queue is at capacity.
    #[error("Job queue is full")]
    QueueFull,

    /// The operation did not complete within the allotted time.
    #[error("Operation timed out")]
    Timeout,

    /// `mark_one_complete` was called with no completions outstanding.
    #[error("Completion signalled with none outstanding")]
    CompletionUnderflow,

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}
