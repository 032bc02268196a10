//! Fixed-size worker pool fed through a bounded queue.
//!
//! The producer submits [`Task`](crate::dispatch::task::Task)s into a bounded
//! MPMC queue shared by every worker. When the queue is full, submission
//! suspends until a worker takes a task, which keeps memory bounded no matter
//! how many items the source yields.
//!
//! Workers report every executed task on the completion channel as a
//! [`Completion::Outcome`]. A worker that dies reports
//! [`Completion::Fatal`] instead, which ends the run.

mod manager;
mod worker;

pub use manager::WorkerPool;

use batchrun_core::{Error, Outcome};

/// Message sent from the workers to the monitor.
#[derive(Debug)]
pub enum Completion {
    /// One task finished, successfully or not.
    Outcome(Outcome),
    /// A worker could not continue. No further outcomes can be trusted.
    Fatal(Error),
}
