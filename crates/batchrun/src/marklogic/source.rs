use super::{Error, RestClient};
use batchrun_core::{ItemBatch, ItemSource, Result, WorkItem};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use serde_json::json;

/// Separator pattern handed to the uris module for splitting the selector.
const SELECTOR_PATTERN: &str = "[,\\s]+";

/// Item source backed by a uris module.
///
/// The module receives the selector and answers with a result sequence whose
/// first value is the item count, followed by one value per work item. Items
/// are streamed as the response arrives.
pub struct UrisSource {
    client: RestClient,
    module: String,
}

impl UrisSource {
    pub fn new(client: RestClient, module: impl Into<String>) -> Self {
        Self {
            client,
            module: module.into(),
        }
    }
}

impl ItemSource for UrisSource {
    type Items = BoxStream<'static, Result<WorkItem>>;

    async fn count_and_stream(&self, selector: &str) -> Result<ItemBatch<Self::Items>> {
        let vars = json!({
            "URIS": selector,
            "TYPE": "COLLECTION",
            "PATTERN": SELECTOR_PATTERN,
        });

        tracing::debug!("Invoking uris module {} for `{selector}`", self.module);
        let mut parts = self
            .client
            .invoke(&self.module, &vars)
            .await
            .map_err(|e| unavailable(&self.module, &e))?;

        let first = parts
            .next()
            .await
            .ok_or_else(|| {
                batchrun_core::Error::unavailable(format!(
                    "uris module {} returned no count",
                    self.module
                ))
            })?
            .map_err(|e| unavailable(&self.module, &e))?;
        let total = parse_count(&first)?;

        let module = self.module.clone();
        let items = parts
            .map(move |part| {
                part.and_then(|bytes| to_item(&bytes))
                    .map_err(|e| unavailable(&module, &e))
            })
            .boxed();

        Ok(ItemBatch { total, items })
    }
}

fn unavailable(module: &str, err: &Error) -> batchrun_core::Error {
    batchrun_core::Error::unavailable(format!("uris module {module}: {err}"))
}

fn to_item(part: &Bytes) -> core::result::Result<WorkItem, Error> {
    let item = core::str::from_utf8(part)?;
    Ok(WorkItem::from(item))
}

fn parse_count(part: &Bytes) -> Result<u64> {
    let text = String::from_utf8_lossy(part);
    text.trim().parse().map_err(|_| {
        batchrun_core::Error::unavailable(format!(
            "uris module returned a non-numeric count `{}`",
            text.trim()
        ))
    })
}
