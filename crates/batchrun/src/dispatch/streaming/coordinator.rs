use crate::dispatch::{manager::StopHandle, pool::WorkerPool, task::TaskFactory};
use batchrun_core::{Connector, Error, Result, WorkItem};
use core::time::Duration;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::{sync::watch, time::Instant};

/// Number of queued items between two producer progress lines.
pub const RECEIVE_LOG_INTERVAL: u64 = 25_000;

/// A batch of [`RECEIVE_LOG_INTERVAL`] items taking longer than this to
/// arrive from the source is reported as a slow receive.
pub const SLOW_RECEIVE_THRESHOLD: Duration = Duration::from_secs(4);

/// Pulls every item from `items` and submits one task per item to the pool.
///
/// Submission suspends while the queue is full, so the source is only read as
/// fast as the workers drain it.
///
/// # Arguments
///
/// - `total`: The item count declared by the source.
/// - `items`: The item stream, consumed lazily.
/// - `pool`: The pool receiving the tasks.
/// - `factory`: Wraps each item into a task.
/// - `stop`: Observed so the producer exits quietly once the run is stopped.
/// - `expected`: Lowered to the actual count if the source under-delivers.
///
/// # Behavior
///
/// - Returns the number of items submitted.
/// - An item beyond `total` fails the run with [`Error::CountMismatch`]
///   before it is submitted.
/// - Fewer items than `total` is logged and tolerated: the expected total is
///   lowered so the monitor can still finish.
///
/// # Errors
///
/// - [`Error::CountMismatch`] on over-delivery.
/// - Any error yielded by the item stream.
/// - [`Error::Scheduling`] or [`Error::PoolStopped`] if submission fails while
///   the run has not been stopped.
pub async fn feed_items<St, C>(
    total: u64,
    mut items: St,
    pool: &WorkerPool,
    factory: &Arc<TaskFactory<C>>,
    stop: &StopHandle,
    expected: &watch::Sender<u64>,
) -> Result<u64>
where
    St: Stream<Item = Result<WorkItem>> + Unpin,
    C: Connector,
{
    tracing::info!("Populating queue");

    let stopped = stop.child_token();
    let mut count: u64 = 0;
    let mut batch_start = Instant::now();

    loop {
        let next = tokio::select! {
            biased;
            () = stopped.cancelled() => {
                tracing::debug!("Run stopped while producing ({count}/{total} queued)");
                return Ok(count);
            }
            next = items.next() => next,
        };
        let Some(item) = next else { break };
        let item = item?;

        if count >= total {
            return Err(Error::CountMismatch {
                expected: total,
                item: item.into_inner().into(),
            });
        }
        if count == 0 {
            tracing::info!("Received first item: {item}");
        }

        count += 1;
        let checkpoint = (count % RECEIVE_LOG_INTERVAL == 0).then(|| item.to_string());

        match pool.submit(factory.new_task(item)).await {
            Ok(()) => {}
            Err(_) if stop.is_stopped() => {
                tracing::debug!(
                    "Run stopped while submitting ({}/{total} queued)",
                    count - 1
                );
                return Ok(count - 1);
            }
            Err(e) => return Err(e),
        }

        if let Some(last) = checkpoint {
            tracing::info!("Queued {count}/{total}: {last}");
            let elapsed = batch_start.elapsed();
            if elapsed > SLOW_RECEIVE_THRESHOLD {
                tracing::warn!(
                    "Slow receive: {RECEIVE_LOG_INTERVAL} items took {:.1}s",
                    elapsed.as_secs_f64()
                );
            }
            batch_start = Instant::now();
        }
    }

    if count < total {
        tracing::warn!(
            "Expected {total} items but the source yielded {count}; waiting for {count} outcomes"
        );
        expected.send_replace(count);
    }
    tracing::info!("Finished queueing {count}/{total} items");
    Ok(count)
}
