use super::RestClient;
use batchrun_core::{Connector, Error, Result, Session, WorkItem};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::json;

/// Connector for the process module.
///
/// HTTP connections are pooled by the client, so opening a session is cheap;
/// each task still gets a session of its own.
#[derive(Clone, Debug)]
pub struct RestConnector {
    client: RestClient,
}

impl RestConnector {
    pub const fn new(client: RestClient) -> Self {
        Self { client }
    }
}

impl Connector for RestConnector {
    type Session = RestSession;

    async fn connect(&self) -> Result<RestSession> {
        Ok(RestSession {
            client: self.client.clone(),
        })
    }
}

/// A session bound to one task.
#[derive(Debug)]
pub struct RestSession {
    client: RestClient,
}

impl Session for RestSession {
    /// Invokes `module` with external variable `URI` set to the item. Every
    /// value of the result sequence becomes one line of the response.
    async fn invoke(&mut self, module: &str, item: &WorkItem) -> Result<String> {
        let vars = json!({ "URI": item.as_str() });
        let remote = |e: super::Error| Error::remote(format!("{module} failed for {item}: {e}"));

        let parts: Vec<Bytes> = self
            .client
            .invoke(module, &vars)
            .await
            .map_err(remote)?
            .try_collect()
            .await
            .map_err(remote)?;

        let mut response = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                response.push('\n');
            }
            response.push_str(&String::from_utf8_lossy(part));
        }
        Ok(response)
    }
}
