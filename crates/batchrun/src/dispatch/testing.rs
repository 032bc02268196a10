//! In-memory collaborators shared by the dispatch tests.

use crate::dispatch::{
    config::DispatchConfig,
    task::{Execute, Task},
};
use batchrun_core::{
    Connector, Error, ItemBatch, ItemSource, Result, ResultSink, Session, WorkItem,
};
use core::time::Duration;
use futures::{
    future::BoxFuture,
    stream::{self, BoxStream, StreamExt},
};
use parking_lot::Mutex;
use portable_atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::{Semaphore, mpsc};

pub fn dispatch_config(threads: usize, queue_capacity: usize) -> DispatchConfig {
    DispatchConfig {
        threads,
        queue_capacity,
        process_module: "/process.xqy".to_string(),
        progress_interval: Duration::from_millis(50),
        slow_drain_threshold: Duration::from_millis(100),
    }
}

/// Executor driven by plain closures, for exercising the pool directly.
pub struct FnExecutor<F>(F);

impl<F> Execute for FnExecutor<F>
where
    F: Fn(WorkItem) -> BoxFuture<'static, Result<WorkItem>> + Send + Sync,
{
    fn execute(self: Arc<Self>, item: WorkItem) -> BoxFuture<'static, Result<WorkItem>> {
        (self.0)(item)
    }
}

pub fn ok_executor() -> Arc<dyn Execute> {
    Arc::new(FnExecutor(|item: WorkItem| -> BoxFuture<'static, Result<WorkItem>> {
        Box::pin(async move { Ok(item) })
    }))
}

pub fn panicking_executor() -> Arc<dyn Execute> {
    Arc::new(FnExecutor(|item: WorkItem| -> BoxFuture<'static, Result<WorkItem>> {
        Box::pin(async move { Err::<WorkItem, _>(explode(&item)) })
    }))
}

fn explode(item: &WorkItem) -> Error {
    panic!("cannot process {item}")
}

/// Reports each item on `started`, then waits for one permit of `release`.
pub fn gated_executor(
    release: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
) -> Arc<dyn Execute> {
    Arc::new(FnExecutor(move |item: WorkItem| -> BoxFuture<'static, Result<WorkItem>> {
        let release = Arc::clone(&release);
        let started = started.clone();
        Box::pin(async move {
            let _ = started.send(item.to_string());
            release
                .acquire()
                .await
                .map_err(|e| Error::remote(e.to_string()))?
                .forget();
            Ok(item)
        })
    }))
}

/// Wraps `name` into a task for `executor`.
pub fn task(name: &str, executor: &Arc<dyn Execute>) -> Task {
    Task::new(WorkItem::from(name), Arc::clone(executor))
}

/// Collects written lines in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    fail: bool,
    fail_flush: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            lines: Mutex::default(),
            fail: true,
            fail_flush: false,
        }
    }

    /// Accepts every line but cannot persist them.
    pub fn failing_flush() -> Self {
        Self {
            lines: Mutex::default(),
            fail: false,
            fail_flush: true,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ResultSink for MemorySink {
    fn write(&self, line: &str) -> Result<()> {
        if self.fail {
            return Err(Error::ResultSink {
                context: "disk full".to_string(),
            });
        }
        self.lines.lock().push(line.to_string());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if self.fail_flush {
            return Err(Error::ResultSink {
                context: "disk full".to_string(),
            });
        }
        Ok(())
    }
}

/// Item source over a fixed list, with a declared total that may disagree
/// with the number of items it actually yields.
pub struct VecSource {
    total: u64,
    items: Vec<String>,
    fail_after: Option<usize>,
    unavailable: bool,
}

impl VecSource {
    pub fn new<I, S>(total: u64, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            total,
            items: items.into_iter().map(Into::into).collect(),
            fail_after: None,
            unavailable: false,
        }
    }

    /// Source whose `0..n` items are named `item-<i>`.
    pub fn numbered(n: usize) -> Self {
        Self::new(n as u64, (0..n).map(|i| format!("item-{i}")))
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(0, Vec::<String>::new())
        }
    }

    /// Ends the stream with an error after `n` items.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl ItemSource for VecSource {
    type Items = BoxStream<'static, Result<WorkItem>>;

    async fn count_and_stream(&self, _selector: &str) -> Result<ItemBatch<Self::Items>> {
        if self.unavailable {
            return Err(Error::unavailable("connection refused"));
        }

        let mut items: Vec<Result<WorkItem>> =
            self.items.iter().cloned().map(WorkItem::from).map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(Error::unavailable("stream reset")));
        }

        Ok(ItemBatch {
            total: self.total,
            items: stream::iter(items).boxed(),
        })
    }
}

#[derive(Default)]
struct MockState {
    fail: HashSet<String>,
    panic: HashSet<String>,
    gate: Option<(Arc<Semaphore>, mpsc::UnboundedSender<String>)>,
    invocations: AtomicUsize,
    open_sessions: AtomicIsize,
    max_open_sessions: AtomicIsize,
}

/// Connector that answers `"<module>: <item>"`, or fails or panics for
/// configured items.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut MockState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|_| {
            panic!("MockConnector must be configured before it is cloned")
        });
        f(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn failing_on<const N: usize>(self, items: [&str; N]) -> Self {
        self.configure(|s| s.fail.extend(items.iter().map(|i| (*i).to_string())))
    }

    pub fn panicking_on<const N: usize>(self, items: [&str; N]) -> Self {
        self.configure(|s| s.panic.extend(items.iter().map(|i| (*i).to_string())))
    }

    /// Every invocation reports its item on `started` and then waits for one
    /// permit of `release`.
    pub fn gated(self, release: Arc<Semaphore>, started: mpsc::UnboundedSender<String>) -> Self {
        self.configure(|s| s.gate = Some((release, started)))
    }

    pub fn invocations(&self) -> usize {
        self.state.invocations.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> isize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn max_open_sessions(&self) -> isize {
        self.state.max_open_sessions.load(Ordering::SeqCst)
    }
}

pub struct MockSession {
    state: Arc<MockState>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession> {
        let open = self.state.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open_sessions.fetch_max(open, Ordering::SeqCst);
        Ok(MockSession {
            state: Arc::clone(&self.state),
        })
    }
}

impl Session for MockSession {
    async fn invoke(&mut self, module: &str, item: &WorkItem) -> Result<String> {
        self.state.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some((release, started)) = &self.state.gate {
            let _ = started.send(item.to_string());
            release
                .acquire()
                .await
                .map_err(|e| Error::remote(e.to_string()))?
                .forget();
        }

        if self.state.panic.contains(item.as_str()) {
            panic!("remote module crashed on {item}");
        }
        if self.state.fail.contains(item.as_str()) {
            return Err(Error::remote(format!("{module} rejected {item}")));
        }
        Ok(format!("{module}: {item}"))
    }
}
