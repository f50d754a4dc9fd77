//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::types::{TaskId, WorkerId};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task request is malformed.
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// Task category is not recognized or has no priority base.
    #[error("invalid category: {0}")]
    InvalidCategory(String),
    /// Estimated cost must be positive.
    #[error("invalid cost: estimated cost must be greater than zero")]
    InvalidCost,
    /// The budget cannot cover the request right now.
    #[error("budget exhausted for partition `{0}`")]
    BudgetExhausted(String),
    /// No partition has a free worker slot for the category.
    #[error("no partition capacity for category `{0}`")]
    NoCapacity(String),
    /// A cold-start worker did not initialize in time.
    #[error("worker spawn timed out after {attempts} attempt(s)")]
    WorkerSpawnTimeout {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Another caller changed the entity first.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    /// Worker does not exist or was already purged.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),
    /// Task does not exist or was already archived.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// Requested lifecycle edge is not allowed.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
    /// Partition is not in the registry.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Queue is full.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A transition could not be durably recorded.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SchedulerError {
    /// Whether the caller may retry the same request later.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BudgetExhausted(_)
                | Self::NoCapacity(_)
                | Self::WorkerSpawnTimeout { .. }
                | Self::ConcurrentModification(_)
                | Self::QueueFull(_)
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
