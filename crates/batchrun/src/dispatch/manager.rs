//! Run orchestration.
//!
//! The [`Manager`] owns one run from start to finish:
//!
//! 1. Ask the item source for the declared total and the item stream.
//! 2. Start the [`WorkerPool`] and the [`Monitor`].
//! 3. Feed every item into the pool, blocking whenever the queue is full.
//! 4. Close the pool and wait for the monitor to account for every item.
//!
//! Stopping goes through a [`StopHandle`], which can be cloned and triggered
//! from anywhere (a signal handler, the monitor on a fatal error, or the
//! manager itself on a structural failure).

use crate::dispatch::{
    config::DispatchConfig,
    monitor::{Monitor, MonitorReport, MonitorState},
    pool::WorkerPool,
    streaming::feed_items,
    task::TaskFactory,
    telemetry::record_run_duration,
};
use batchrun_core::{
    Connector, Error, ItemBatch, ItemSource, PoolState, ProgressCounters, Result, ResultSink,
};
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Idempotent, cloneable trigger for stopping a run.
///
/// The first [`stop`](Self::stop) interrupts the pool, discards queued tasks,
/// cancels every token derived from this handle and moves the pool state to
/// [`PoolState::Stopped`]. Later calls do nothing.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    token: CancellationToken,
    pool: Mutex<Option<WorkerPool>>,
    state: watch::Sender<PoolState>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                token: CancellationToken::new(),
                pool: Mutex::new(None),
                state: watch::Sender::new(PoolState::Running),
            }),
        }
    }

    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            tracing::trace!("Stop already requested");
            return;
        }

        tracing::info!("Cleaning up");
        let pool = self.inner.pool.lock().take();
        if let Some(pool) = pool {
            let discarded = pool.shutdown_now();
            if discarded > 0 {
                tracing::warn!("Worker pool was shut down with {discarded} pending tasks");
            }
        }

        self.inner.token.cancel();
        self.inner.state.send_replace(PoolState::Stopped);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Token cancelled by the first [`stop`](Self::stop).
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    pub fn state(&self) -> PoolState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: PoolState) {
        self.inner.state.send_if_modified(|current| {
            // Stopped is terminal.
            if *current == PoolState::Stopped || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Registers the pool that [`stop`](Self::stop) must interrupt.
    pub(crate) fn attach_pool(&self, pool: WorkerPool) {
        if self.is_stopped() {
            pool.shutdown_now();
            return;
        }
        *self.inner.pool.lock() = Some(pool);
    }
}

/// Totals of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: ProgressCounters,
    pub elapsed: Duration,
}

/// Drives one run of `selector` through the pool.
pub struct Manager<S, C> {
    config: DispatchConfig,
    selector: String,
    source: S,
    factory: Arc<TaskFactory<C>>,
    sink: Arc<dyn ResultSink>,
    stop: StopHandle,
}

impl<S, C> Manager<S, C>
where
    S: ItemSource,
    C: Connector,
{
    pub fn new(
        config: DispatchConfig,
        source: S,
        connector: C,
        sink: Arc<dyn ResultSink>,
        selector: impl Into<String>,
    ) -> Self {
        let factory = TaskFactory::new(
            connector,
            config.process_module.as_str(),
            Arc::clone(&sink),
        );
        Self {
            config,
            selector: selector.into(),
            source,
            factory,
            sink,
            stop: StopHandle::new(),
        }
    }

    #[cfg(test)]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stops the run. Safe to call any number of times, from any task.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> PoolState {
        self.stop.state()
    }

    /// Executes the run and returns its totals.
    ///
    /// Per-item failures do not fail the run; they are counted in the summary.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] before anything starts.
    /// - [`Error::SourceUnavailable`] if the source cannot be read.
    /// - [`Error::CountMismatch`] if the source over-delivers.
    /// - [`Error::FatalPool`] if the pool or monitor dies.
    /// - [`Error::Scheduling`] if the run is stopped before completing.
    #[tracing::instrument(skip_all, fields(selector = %self.selector))]
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        self.config.validate()?;

        tracing::info!(
            "Starting run: module = {}, threads = {}, queue capacity = {}",
            self.factory.module(),
            self.config.threads,
            self.config.queue_capacity
        );

        let batch = self.source.count_and_stream(&self.selector).await;
        let ItemBatch { total, items } = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("{e}");
                self.stop.stop();
                return Err(e);
            }
        };
        tracing::info!("Expecting total {total}");

        if total == 0 {
            tracing::info!("Nothing to process");
            self.stop.stop();
            return Ok(self.finish(ProgressCounters::new(0), start));
        }
        if self.stop.is_stopped() {
            return Err(Error::scheduling("run stopped before dispatch started"));
        }

        let (completion_tx, completion_rx) =
            mpsc::channel(self.config.threads.saturating_mul(4).max(16));
        let pool = WorkerPool::start(
            &self.config,
            completion_tx,
            self.stop.subscribe(),
            self.stop.child_token(),
        );
        self.stop.attach_pool(pool.clone());

        let (expected_tx, expected_rx) = watch::channel(total);
        let monitor = Monitor::new(
            &self.config,
            completion_rx,
            expected_rx,
            pool.clone(),
            self.stop.clone(),
        )
        .spawn();

        let fed = feed_items(total, items, &pool, &self.factory, &self.stop, &expected_tx).await;
        if let Err(e) = fed {
            tracing::error!("{e}");
            monitor.shutdown_now();
            self.stop.stop();
            // The monitor's own result adds nothing to the producer error.
            let _ = monitor.wait().await;
            return Err(e);
        }

        if !self.stop.is_stopped() {
            self.stop.set_state(PoolState::Draining);
            pool.close();
        }

        let report = match monitor.wait().await {
            Ok(report) => report,
            Err(e) => {
                self.stop.stop();
                return Err(e);
            }
        };

        match report {
            MonitorReport {
                state: MonitorState::Done,
                counters,
                ..
            } => {
                if let Err(e) = pool.join().await.and_then(|()| self.sink.flush()) {
                    tracing::error!("{e}");
                    self.stop.stop();
                    return Err(e);
                }
                self.stop.stop();
                Ok(self.finish(counters, start))
            }
            MonitorReport { counters, .. } => {
                self.stop.stop();
                Err(Error::scheduling(format!("run stopped before completion: {counters}")))
            }
        }
    }

    fn finish(&self, counters: ProgressCounters, start: Instant) -> RunSummary {
        let elapsed = start.elapsed();
        record_run_duration(elapsed.as_secs_f64() * 1000.0);

        let secs = elapsed.as_secs_f64();
        if counters.failed > 0 {
            tracing::warn!("Run finished in {secs:.1}s: {counters}");
        } else {
            tracing::info!("Run finished in {secs:.1}s: {counters}");
        }
        RunSummary { counters, elapsed }
    }
}
