//! # Dispatch Data Model
//!
//! The values that flow through a single run of the engine:
//!
//! - [`WorkItem`] - An opaque identifier produced by the item source and
//!   consumed by exactly one task.
//! - [`ItemBatch`] - The declared item count paired with a lazy item stream.
//! - [`Outcome`] - The result of executing one task, moved from a worker to
//!   the monitor.
//! - [`ProgressCounters`] - Aggregate progress, owned by the monitor.
//! - [`PoolState`] - Lifecycle of the worker pool, owned by the manager.
//!
//! Work items are kept as boxed string slices rather than `String`s: a run may
//! hold up to `queue capacity` of them at once, and dropping the spare
//! capacity word keeps that footprint predictable.

use crate::Error;
use core::fmt;

/// An opaque, immutable work-item identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem(Box<str>);

impl WorkItem {
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> Box<str> {
        self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkItem {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for WorkItem {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

/// The declared total and the lazy item stream returned by an
/// [`ItemSource`](crate::ItemSource).
///
/// The stream is expected to yield exactly `total` items. Over-delivery is a
/// fatal protocol violation; under-delivery ends the run early with a warning.
pub struct ItemBatch<S> {
    pub total: u64,
    pub items: S,
}

impl<S> fmt::Debug for ItemBatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemBatch")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// The result record of executing one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub item: WorkItem,
    pub error: Option<Error>,
}

impl Outcome {
    pub const fn success(item: WorkItem) -> Self {
        Self { item, error: None }
    }

    pub const fn failure(item: WorkItem, error: Error) -> Self {
        Self {
            item,
            error: Some(error),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate progress of a run.
///
/// Mutated only by the monitor. `completed + failed` never exceeds `total`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ProgressCounters {
    pub const fn new(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
        }
    }

    /// Number of outcomes observed so far, successful or not.
    pub const fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    pub const fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.finished())
    }

    pub const fn is_done(&self) -> bool {
        self.finished() >= self.total
    }

    /// Records an outcome and returns whether it was a success.
    pub const fn record(&mut self, outcome: &Outcome) -> bool {
        if outcome.is_success() {
            self.completed += 1;
            true
        } else {
            self.failed += 1;
            false
        }
    }
}

impl fmt::Display for ProgressCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed {}/{} ({} failed)",
            self.finished(),
            self.total,
            self.failed
        )
    }
}

/// Lifecycle of the worker pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Accepting submissions.
    #[default]
    Running,
    /// Submission side closed; queued tasks are draining.
    Draining,
    /// Terminal. No further submissions are accepted.
    Stopped,
}

impl PoolState {
    pub const fn accepts_submissions(self) -> bool {
        matches!(self, Self::Running)
    }
}
