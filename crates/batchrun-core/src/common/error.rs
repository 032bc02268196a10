//! Error types for the dispatch engine.
//!
//! This module defines the central `Error` enum shared by the engine and its
//! collaborators. Variants fall into two groups that are handled very
//! differently at runtime:
//!
//! ## Per-item failures
//!
//! These never escape a worker. They are attached to a failure
//! [`Outcome`](crate::Outcome), tallied by the monitor and logged, and the run
//! continues.
//!
//! - `RemoteInvocation`: The remote processing call for one item failed
//!   (connection error, remote error, timeout).
//! - `ResultSink`: The response was produced but could not be written to the
//!   result sink.
//! - `WorkerPanic`: Executing the task panicked; the worker survives.
//!
//! ## Structural failures
//!
//! These unwind to the manager's `stop()` and then to the caller of `run()`.
//!
//! - `Scheduling`: The producer was interrupted while blocked on a full queue,
//!   or the queue itself failed.
//! - `CountMismatch`: The item source delivered more items than it declared.
//! - `SourceUnavailable`: The item count/stream or the endpoint could not be
//!   obtained at startup.
//! - `FatalPool`: The execution machinery itself failed (a worker died, or the
//!   completion channel closed with outcomes outstanding).
//! - `PoolStopped`: A submission arrived after the pool was stopped.
//! - `InvalidConfig`: A configuration value violates its constraints.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch engine.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The remote processing call for a single item failed.
    #[error("Remote invocation failed: {context}")]
    RemoteInvocation { context: String },

    /// The result sink rejected a response line.
    #[error("Result sink error: {context}")]
    ResultSink { context: String },

    /// Task execution panicked inside a worker.
    #[error("Worker panicked while executing task: {message}")]
    WorkerPanic { message: String },

    /// Submission was interrupted or the queue failed internally.
    #[error("Scheduling failure: {context}")]
    Scheduling { context: String },

    /// The item source delivered more items than the total it declared.
    #[error("Received more than {expected} items (extra item: {item})")]
    CountMismatch { expected: u64, item: String },

    /// The item source or the endpoint could not be reached at startup.
    #[error("Source unavailable: {context}")]
    SourceUnavailable { context: String },

    /// The execution machinery failed independently of any single item.
    #[error("Fatal pool error: {context}")]
    FatalPool { context: String },

    /// The pool no longer accepts submissions.
    #[error("Worker pool is stopped")]
    PoolStopped,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Returns `true` for errors that only affect a single item and are
    /// recorded as a failure outcome rather than aborting the run.
    pub const fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Self::RemoteInvocation { .. } | Self::ResultSink { .. } | Self::WorkerPanic { .. }
        )
    }

    pub fn remote(context: impl Into<String>) -> Self {
        Self::RemoteInvocation {
            context: context.into(),
        }
    }

    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            context: context.into(),
        }
    }

    pub fn scheduling(context: impl Into<String>) -> Self {
        Self::Scheduling {
            context: context.into(),
        }
    }

    pub fn fatal(context: impl Into<String>) -> Self {
        Self::FatalPool {
            context: context.into(),
        }
    }
}
