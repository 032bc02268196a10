//! Contracts for the collaborators the engine depends on but does not own.
//!
//! The engine is generic over these traits so that the remote database, the
//! item query and the output destination can be swapped (or faked in tests)
//! without touching scheduling code.

use crate::{ItemBatch, Result, WorkItem};
use futures::Stream;

/// Supplies the declared item count and a lazy stream of work items.
///
/// Implementations must not buffer the whole result: the stream may carry
/// millions of identifiers and the engine consumes it one item at a time,
/// suspending whenever the dispatch queue is full.
pub trait ItemSource: Send + Sync {
    /// The item stream. Errors surfaced mid-stream abort the run.
    type Items: Stream<Item = Result<WorkItem>> + Send + Unpin + 'static;

    /// Resolves `selector` into a total and an item stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`](crate::Error::SourceUnavailable)
    /// if the count or the stream cannot be obtained.
    fn count_and_stream(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<ItemBatch<Self::Items>>> + Send;
}

/// Opens sessions against the remote processing endpoint.
///
/// A connector is shared by every worker; sessions are not. Each task opens
/// its own session and drops it when execution ends, on every exit path.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Opens a session private to the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteInvocation`](crate::Error::RemoteInvocation)
    /// if the endpoint cannot be reached.
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// A scoped connection to the remote processing endpoint.
pub trait Session: Send {
    /// Invokes `module` with `item` as its sole input and returns the textual
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteInvocation`](crate::Error::RemoteInvocation)
    /// carrying the cause on connection, remote or timeout failures.
    fn invoke(
        &mut self,
        module: &str,
        item: &WorkItem,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Append-only destination for successful responses, one line per item.
///
/// Failures are never written here; they are logged instead.
pub trait ResultSink: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::ResultSink`](crate::Error::ResultSink) if the line
    /// cannot be recorded.
    fn write(&self, line: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`Error::ResultSink`](crate::Error::ResultSink) if buffered
    /// lines cannot be persisted.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
