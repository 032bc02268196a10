//! Completion tracking for a single run.
//!
//! The [`Monitor`] consumes the completion channel, keeps the
//! [`ProgressCounters`], reports progress on a fixed interval and decides
//! when the run is over:
//!
//! ```text
//! WAITING --(finished == total)--> DONE     pool closed, monitor exits
//! WAITING --(fatal / cancelled)--> STOPPED  manager stop() requested
//! ```

use crate::dispatch::{
    config::DispatchConfig,
    manager::StopHandle,
    pool::{Completion, WorkerPool},
    telemetry::{increment_items_completed, increment_items_failed},
};
use batchrun_core::{Error, Outcome, ProgressCounters, Result};
use core::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Waiting,
    Done,
    Stopped,
}

/// Final state and tallies of a monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorReport {
    pub state: MonitorState,
    pub counters: ProgressCounters,
    /// Progress lines logged.
    pub progress_reports: u32,
    /// Slow-drain warnings logged.
    pub stalls: u32,
}

pub struct Monitor {
    completions: mpsc::Receiver<Completion>,
    expected: watch::Receiver<u64>,
    pool: WorkerPool,
    stop: StopHandle,
    token: CancellationToken,
    progress_interval: Duration,
    slow_drain_threshold: Duration,
    counters: ProgressCounters,
    state: MonitorState,
    progress_reports: u32,
    stalls: u32,
}

/// Handle to a spawned [`Monitor`].
pub struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<Result<MonitorReport>>,
}

impl MonitorHandle {
    /// Interrupts the monitor; it exits in the `Stopped` state.
    pub fn shutdown_now(&self) {
        self.token.cancel();
    }

    /// Waits for the monitor to exit.
    ///
    /// # Errors
    ///
    /// Returns whatever structural failure ended the monitor, or
    /// [`Error::FatalPool`] if the monitor task itself panicked.
    pub async fn wait(self) -> Result<MonitorReport> {
        self.handle
            .await
            .map_err(|e| Error::fatal(format!("monitor task failed: {e}")))?
    }
}

impl Monitor {
    /// `expected` carries the total to wait for. It starts at the declared
    /// total and is lowered by the producer if the source under-delivers.
    pub fn new(
        config: &DispatchConfig,
        completions: mpsc::Receiver<Completion>,
        expected: watch::Receiver<u64>,
        pool: WorkerPool,
        stop: StopHandle,
    ) -> Self {
        let total = *expected.borrow();
        let token = stop.child_token();
        Self {
            completions,
            expected,
            pool,
            stop,
            token,
            progress_interval: config.progress_interval,
            slow_drain_threshold: config.slow_drain_threshold,
            counters: ProgressCounters::new(total),
            state: MonitorState::Waiting,
            progress_reports: 0,
            stalls: 0,
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let token = self.token.clone();
        let handle = tokio::spawn(self.run());
        MonitorHandle { token, handle }
    }

    /// Tallies outcomes until every expected item is accounted for.
    ///
    /// # Errors
    ///
    /// - The error carried by a [`Completion::Fatal`].
    /// - [`Error::FatalPool`] if the completion channel closes while outcomes
    ///   are still outstanding.
    ///
    /// Either way the manager's `stop()` has been invoked before returning.
    pub async fn run(mut self) -> Result<MonitorReport> {
        let started = Instant::now();
        let mut last_completion = started;
        let mut stall_warned = false;
        let mut expected_open = true;

        let mut ticker = interval_at(started + self.progress_interval, self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Monitor waiting for {} outcomes", self.counters.total);

        while !self.counters.is_done() {
            tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    self.state = MonitorState::Stopped;
                    tracing::info!("Monitor stopped: {}", self.counters);
                    return Ok(self.report());
                }
                completion = self.completions.recv() => match completion {
                    Some(Completion::Outcome(outcome)) => {
                        self.record(&outcome);
                        last_completion = Instant::now();
                        stall_warned = false;
                    }
                    Some(Completion::Fatal(err)) => {
                        tracing::error!("Fatal error: {err}");
                        tracing::warn!("Exiting due to fatal error");
                        return Err(self.fail(err));
                    }
                    None => {
                        // The producer lowers the total before closing the
                        // pool, so the change may not have been observed yet.
                        let total = *self.expected.borrow_and_update();
                        self.adjust_total(total);
                        if self.counters.is_done() {
                            break;
                        }
                        let err = Error::fatal(format!(
                            "completion channel closed with {} outcomes outstanding",
                            self.counters.remaining()
                        ));
                        tracing::error!("{err}");
                        return Err(self.fail(err));
                    }
                },
                changed = self.expected.changed(), if expected_open => match changed {
                    Ok(()) => {
                        let total = *self.expected.borrow_and_update();
                        self.adjust_total(total);
                    }
                    Err(_) => expected_open = false,
                },
                _ = ticker.tick() => {
                    self.report_progress(started);
                    let idle = last_completion.elapsed();
                    if !stall_warned && idle >= self.slow_drain_threshold {
                        tracing::warn!(
                            "No task has completed for {:.1}s ({} outstanding, {} queued)",
                            idle.as_secs_f64(),
                            self.counters.remaining(),
                            self.pool.queued()
                        );
                        stall_warned = true;
                        self.stalls += 1;
                    }
                }
            }
        }

        self.state = MonitorState::Done;
        tracing::info!("All outcomes received: {}", self.counters);
        self.pool.close();
        Ok(self.report())
    }

    fn record(&mut self, outcome: &Outcome) {
        if self.counters.record(outcome) {
            increment_items_completed();
            tracing::trace!(item = %outcome.item, "completed");
        } else {
            increment_items_failed();
            if let Some(err) = &outcome.error {
                tracing::error!(item = %outcome.item, "{err}");
            }
        }
    }

    fn adjust_total(&mut self, total: u64) {
        if total != self.counters.total {
            tracing::info!(
                "Expected total adjusted from {} to {total}",
                self.counters.total
            );
            self.counters.total = total;
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = MonitorState::Stopped;
        self.stop.stop();
        err
    }

    fn report_progress(&mut self, started: Instant) {
        self.progress_reports += 1;
        let finished = self.counters.finished();
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            finished as f64 / elapsed
        } else {
            0.0
        };

        if rate > 0.0 {
            let eta = self.counters.remaining() as f64 / rate;
            tracing::info!(
                "Progress: {} ({rate:.1}/s, about {eta:.0}s remaining)",
                self.counters
            );
        } else {
            tracing::info!("Progress: {}", self.counters);
        }
    }

    const fn report(&self) -> MonitorReport {
        MonitorReport {
            state: self.state,
            counters: self.counters,
            progress_reports: self.progress_reports,
            stalls: self.stalls,
        }
    }
}
