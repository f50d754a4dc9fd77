//! External executor interface.
//!
//! The scheduler never runs task payloads itself. An executor receives an
//! [`Assignment`], does the work on the assigned worker, and returns what it
//! actually cost.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::scheduler::Assignment;
use crate::core::task::TaskStatus;

/// What an executor reports when a task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// `Completed` or `Failed`.
    pub status: TaskStatus,
    /// Resource actually consumed.
    pub actual_cost: u64,
}

impl ExecutionOutcome {
    /// Successful run.
    #[must_use]
    pub const fn completed(actual_cost: u64) -> Self {
        Self {
            status: TaskStatus::Completed,
            actual_cost,
        }
    }

    /// Failed run.
    #[must_use]
    pub const fn failed(actual_cost: u64) -> Self {
        Self {
            status: TaskStatus::Failed,
            actual_cost,
        }
    }
}

/// Abstraction for executing an assigned task.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_budget_scheduler::core::{Assignment, ExecutionOutcome, TaskExecutor};
///
/// #[derive(Clone)]
/// struct LlmExecutor;
///
/// #[async_trait]
/// impl TaskExecutor for LlmExecutor {
///     async fn execute(&self, assignment: Assignment) -> ExecutionOutcome {
///         let used = run_prompt(&assignment).await;
///         ExecutionOutcome::completed(used)
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + Clone + 'static {
    /// Run the task and report its outcome.
    async fn execute(&self, assignment: Assignment) -> ExecutionOutcome;
}

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn a future that runs to completion in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
