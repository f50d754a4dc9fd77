//! Infrastructure adapters for the pending-task queue and the state store.

pub mod queue;
pub mod store;

pub use queue::{InMemoryQueue, QueuedTask, TaskQueue};
pub use store::{FileStore, InMemoryStore, StateStore, StoreError};
