//! Units of work handed to the worker pool.
//!
//! A [`Task`] pairs one [`WorkItem`] with the shared executor that knows how to
//! process it. Tasks are created by a [`TaskFactory`], which binds the remote
//! module, the connector and the result sink once for the whole run.

mod factory;

pub use factory::TaskFactory;

use batchrun_core::{Result, WorkItem};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Executes a single item on behalf of a [`Task`].
///
/// Object safe so the pool can queue tasks without knowing the connector type.
pub trait Execute: Send + Sync {
    /// Processes `item`, resolving to the same item on success.
    fn execute(self: Arc<Self>, item: WorkItem) -> BoxFuture<'static, Result<WorkItem>>;
}

/// A queued unit of work: one item plus its shared executor.
///
/// Executing a task consumes it, so an item is never processed twice.
pub struct Task {
    item: WorkItem,
    executor: Arc<dyn Execute>,
}

impl Task {
    pub fn new(item: WorkItem, executor: Arc<dyn Execute>) -> Self {
        Self { item, executor }
    }

    pub const fn item(&self) -> &WorkItem {
        &self.item
    }

    pub fn execute(self) -> BoxFuture<'static, Result<WorkItem>> {
        self.executor.execute(self.item)
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task").field("item", &self.item).finish_non_exhaustive()
    }
}
