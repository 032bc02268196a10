use super::{Completion, worker::run_worker};
use crate::dispatch::{config::DispatchConfig, task::Task, telemetry::increment_queue_full};
use async_channel::{Receiver, Sender, TrySendError};
use batchrun_core::{Error, PoolState, Result};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// A fixed set of workers draining one bounded task queue.
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// Shutdown comes in two flavors:
/// - [`close`](Self::close) stops accepting tasks and lets the workers drain
///   what is already queued.
/// - [`shutdown_now`](Self::shutdown_now) interrupts the workers and discards
///   queued tasks, returning how many were dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    queue_tx: Sender<Task>,
    queue_rx: Receiver<Task>,
    capacity: usize,
    full_warned: AtomicBool,
    state: watch::Receiver<PoolState>,
    shutdown_token: CancellationToken,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Creates the queue and spawns `config.threads` workers up front.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &DispatchConfig,
        completions: mpsc::Sender<Completion>,
        state: watch::Receiver<PoolState>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = async_channel::bounded(config.queue_capacity);

        let mut workers = JoinSet::new();
        for worker_id in 0..config.threads {
            workers.spawn(run_worker(
                worker_id,
                queue_rx.clone(),
                completions.clone(),
                shutdown_token.clone(),
            ));
        }

        tracing::debug!(
            "Started {} workers over a queue of {}",
            config.threads,
            config.queue_capacity
        );

        Self {
            inner: Arc::new(Inner {
                queue_tx,
                queue_rx,
                capacity: config.queue_capacity,
                full_warned: AtomicBool::new(false),
                state,
                shutdown_token,
                workers: Mutex::new(Some(workers)),
            }),
        }
    }

    /// Enqueues `task`, suspending while the queue is full.
    ///
    /// The first time the queue fills up an advisory warning is logged; it is
    /// not repeated for the rest of the run.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolStopped`] if the pool no longer accepts work.
    /// - [`Error::Scheduling`] if the pool is shut down while waiting for
    ///   capacity. The task is not enqueued.
    pub async fn submit(&self, task: Task) -> Result<()> {
        if self.inner.shutdown_token.is_cancelled()
            || !self.inner.state.borrow().accepts_submissions()
        {
            return Err(Error::PoolStopped);
        }

        let task = match self.inner.queue_tx.try_send(task) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(Error::PoolStopped),
            Err(TrySendError::Full(task)) => task,
        };

        increment_queue_full();
        if !self.inner.full_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "Queue is full: size = {} (this message will only appear once)",
                self.capacity()
            );
        }

        let item = task.item().clone();
        tokio::select! {
            biased;
            () = self.inner.shutdown_token.cancelled() => Err(Error::scheduling(format!(
                "interrupted while waiting for queue capacity (item {item})"
            ))),
            sent = self.inner.queue_tx.send(task) => sent.map_err(|_| Error::PoolStopped),
        }
    }

    /// Stops accepting tasks. Queued tasks are still executed and workers exit
    /// once the queue is empty.
    pub fn close(&self) {
        if self.inner.queue_tx.close() {
            tracing::debug!("Queue closed with {} tasks pending", self.queued());
        }
    }

    /// Interrupts all workers and discards queued tasks.
    ///
    /// Returns the number of tasks that were never started.
    pub fn shutdown_now(&self) -> usize {
        self.inner.shutdown_token.cancel();

        let mut discarded = 0;
        while self.inner.queue_rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.inner.queue_tx.close();
        discarded
    }

    /// Waits for every worker to exit.
    ///
    /// Only the first caller waits; later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalPool`] if a worker task was aborted or panicked
    /// outside of its own panic guard.
    pub async fn join(&self) -> Result<()> {
        let Some(mut workers) = self.inner.workers.lock().take() else {
            return Ok(());
        };

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                return Err(Error::fatal(format!("worker task failed: {e}")));
            }
        }
        tracing::trace!("All workers exited");
        Ok(())
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue_tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}
