//! Producer side of a run: pulling items from the source into the pool.

mod coordinator;

pub use coordinator::feed_items;
