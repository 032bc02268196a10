use super::Completion;
use crate::dispatch::task::Task;
use async_channel::Receiver;
use batchrun_core::{Error, Outcome, Result, WorkItem};
use core::any::Any;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs [`worker_loop`] and turns its death into a [`Completion::Fatal`].
///
/// Panics raised by a task are contained inside the loop. Anything that still
/// unwinds out of it, or an error the loop returns, means the pool can no
/// longer account for its work.
pub(super) async fn run_worker(
    worker_id: usize,
    queue: Receiver<Task>,
    completions: mpsc::Sender<Completion>,
    shutdown_token: CancellationToken,
) {
    let reporter = completions.clone();
    let result = AssertUnwindSafe(worker_loop(worker_id, queue, completions, shutdown_token))
        .catch_unwind()
        .await;

    let err = match result {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(panic) => Error::fatal(format!(
            "worker {worker_id} panicked: {}",
            panic_message(panic.as_ref())
        )),
    };

    tracing::error!("Worker {worker_id} died: {err}");
    let _ = reporter.send(Completion::Fatal(err)).await;
}

/// Takes tasks off the shared queue until it is closed and drained, or until
/// the pool is shut down.
///
/// Every task that was started produces exactly one outcome. A task
/// interrupted by shutdown is reported as a scheduling failure on a
/// best-effort basis, since the monitor may already be gone.
///
/// # Errors
///
/// Returns [`Error::FatalPool`] if an outcome cannot be delivered while the
/// pool is still running.
async fn worker_loop(
    worker_id: usize,
    queue: Receiver<Task>,
    completions: mpsc::Sender<Completion>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let task = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => {
                tracing::debug!("Worker {worker_id} received shutdown signal");
                break;
            }
            next = queue.recv() => match next {
                Ok(task) => task,
                Err(_) => {
                    tracing::trace!("Worker {worker_id} found the queue closed and empty");
                    break;
                }
            },
        };

        let item = task.item().clone();
        let outcome = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => {
                tracing::debug!(item = %item, "Worker {worker_id} interrupted mid-task");
                let interrupted = Error::scheduling("interrupted by pool shutdown");
                let interrupted = Completion::Outcome(Outcome::failure(item, interrupted));
                let _ = completions.try_send(interrupted);
                break;
            }
            result = AssertUnwindSafe(task.execute()).catch_unwind() => into_outcome(item, result),
        };

        if completions.send(Completion::Outcome(outcome)).await.is_err() {
            if shutdown_token.is_cancelled() {
                break;
            }
            return Err(Error::fatal(format!(
                "worker {worker_id} could not report an outcome: completion channel closed"
            )));
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
    Ok(())
}

fn into_outcome(
    item: WorkItem,
    result: core::result::Result<Result<WorkItem>, Box<dyn Any + Send>>,
) -> Outcome {
    match result {
        Ok(Ok(item)) => Outcome::success(item),
        Ok(Err(e)) => Outcome::failure(item, e),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            Outcome::failure(item, Error::WorkerPanic { message })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
