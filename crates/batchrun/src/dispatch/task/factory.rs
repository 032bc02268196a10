use super::{Execute, Task};
use crate::dispatch::telemetry::record_task_duration;
use batchrun_core::{Connector, Result, ResultSink, Session, WorkItem};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

/// Builds [`Task`]s that invoke one remote module per item.
///
/// Every task opens its own session from the shared connector, invokes the
/// module with the item as its only input, releases the session, and appends
/// the textual response to the result sink. Failures are returned to the
/// worker, which reports them; nothing is written to the sink for them.
pub struct TaskFactory<C> {
    connector: C,
    module: Arc<str>,
    sink: Arc<dyn ResultSink>,
}

impl<C: Connector> TaskFactory<C> {
    pub fn new(connector: C, module: impl Into<Arc<str>>, sink: Arc<dyn ResultSink>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            module: module.into(),
            sink,
        })
    }

    /// Wraps `item` into a task bound to this factory.
    pub fn new_task(self: &Arc<Self>, item: WorkItem) -> Task {
        let executor: Arc<dyn Execute> = Arc::clone(self) as Arc<dyn Execute>;
        Task::new(item, executor)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    async fn invoke(&self, item: &WorkItem) -> Result<String> {
        // The session is dropped on every path out of this scope.
        let mut session = self.connector.connect().await?;
        session.invoke(&self.module, item).await
    }
}

impl<C: Connector> Execute for TaskFactory<C> {
    fn execute(self: Arc<Self>, item: WorkItem) -> BoxFuture<'static, Result<WorkItem>> {
        let span = tracing::debug_span!("task", item = %item);
        Box::pin(
            async move {
                let start = Instant::now();
                tracing::trace!(module = %self.module, "Invoking");

                let response = self.invoke(&item).await;
                record_task_duration(start.elapsed().as_secs_f64() * 1000.0);

                self.sink.write(&response?)?;
                Ok(item)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{MemorySink, MockConnector};
    use batchrun_core::Error;

    #[tokio::test]
    async fn successful_task_writes_the_response() {
        let connector = MockConnector::new();
        let sink = Arc::new(MemorySink::default());
        let factory = TaskFactory::new(connector.clone(), "/process.xqy", sink.clone());

        let item = factory
            .new_task(WorkItem::from("a"))
            .execute()
            .await
            .expect("task succeeds");

        assert_eq!(item.as_str(), "a");
        assert_eq!(sink.lines(), vec!["/process.xqy: a".to_string()]);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_task_writes_nothing_and_releases_its_session() {
        let connector = MockConnector::new().failing_on(["b"]);
        let sink = Arc::new(MemorySink::default());
        let factory = TaskFactory::new(connector.clone(), "/process.xqy", sink.clone());

        let err = factory
            .new_task(WorkItem::from("b"))
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteInvocation { .. }), "{err:?}");
        assert!(err.is_item_failure());
        assert!(sink.lines().is_empty());
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.invocations(), 1);
    }

    #[tokio::test]
    async fn sink_failure_is_an_item_failure() {
        let connector = MockConnector::new();
        let sink = Arc::new(MemorySink::failing());
        let factory = TaskFactory::new(connector, "/process.xqy", sink);

        let err = factory
            .new_task(WorkItem::from("a"))
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ResultSink { .. }), "{err:?}");
        assert!(err.is_item_failure());
    }
}
