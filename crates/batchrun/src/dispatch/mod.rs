//! The dispatch engine: a producer feeding a bounded queue, a fixed pool of
//! workers draining it, and a monitor tallying their outcomes.

pub mod config;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod streaming;
pub mod task;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::Manager;
