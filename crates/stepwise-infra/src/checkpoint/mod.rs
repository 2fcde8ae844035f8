//! Checkpoint store adapters.

pub mod file;
pub mod memory;

pub use file::JsonFileCheckpointStore;
pub use memory::{InMemoryCheckpointStore, WriteThroughOrder};
