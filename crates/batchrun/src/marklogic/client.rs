use super::{Error, multipart};
use crate::dispatch::config::ConnectionConfig;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{
    Client, Url,
    header::{ACCEPT, CONTENT_TYPE},
};

/// The result sequence of one module invocation, one entry per item.
pub type PartStream = BoxStream<'static, Result<Bytes, Error>>;

/// Thin client for `POST /v1/invoke`.
///
/// Cloning shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: Client,
    invoke_url: Url,
    username: String,
    password: Option<String>,
    database: Option<String>,
}

impl RestClient {
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built (e.g. the
    /// TLS backend fails to initialize).
    pub fn new(config: &ConnectionConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("batchrun/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut invoke_url = config.base_url.clone();
        invoke_url.set_path("/v1/invoke");

        Ok(Self {
            http,
            invoke_url,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
        })
    }

    /// Evaluates `module` with external variables `vars` and streams back its
    /// result sequence.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] if the request cannot be sent.
    /// - [`Error::Status`] if the endpoint answers with a non-success status.
    pub async fn invoke(
        &self,
        module: &str,
        vars: &serde_json::Value,
    ) -> Result<PartStream, Error> {
        let vars = vars.to_string();
        let mut request = self
            .http
            .post(self.invoke_url.clone())
            .basic_auth(&self.username, self.password.as_deref())
            .header(ACCEPT, "multipart/mixed")
            .form(&[("module", module), ("vars", vars.as_str())]);
        if let Some(database) = &self.database {
            request = request.query(&[("database", database)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(multipart::boundary)
            .map(str::to_string);

        match boundary {
            Some(boundary) => Ok(multipart::parts(&boundary, response.bytes_stream())),
            None => {
                // A single non-multipart value, or nothing at all.
                let body = response.bytes().await?;
                let parts = (!body.is_empty()).then_some(Ok(body));
                Ok(futures::stream::iter(parts).boxed())
            }
        }
    }
}
