//! Data model, error taxonomy and collaborator contracts shared across the
//! workspace.
//!
//! - [`error`] - The unified [`Error`] enum and [`Result`] alias.
//! - [`types`] - Work items, outcomes, counters and pool state.
//! - [`traits`] - Item source, connector/session and result sink contracts.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Connector, ItemSource, ResultSink, Session};
pub use types::{ItemBatch, Outcome, PoolState, ProgressCounters, WorkItem};
