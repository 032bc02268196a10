//! MarkLogic REST collaborators.
//!
//! Both the item query and the per-item processing go through the same
//! endpoint, `POST /v1/invoke`, which evaluates a server-side module and
//! streams its result sequence back as `multipart/mixed`.
//!
//! - [`UrisSource`]: runs the uris module; its first result is the item
//!   count, the rest are the work items.
//! - [`RestConnector`]: runs the process module once per item.

mod client;
mod connector;
mod multipart;
mod source;

pub use client::RestClient;
pub use connector::RestConnector;
pub use source::UrisSource;

use reqwest::StatusCode;

/// Failures talking to the REST endpoint, before they are classified into
/// [`batchrun_core::Error`] by the caller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed multipart response: {0}")]
    Multipart(String),

    #[error("result is not valid UTF-8")]
    Utf8(#[from] core::str::Utf8Error),
}
