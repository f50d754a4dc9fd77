//! API-facing request/response models.
//!
//! Transport-neutral: an HTTP or RPC layer deserializes a [`TaskSubmission`],
//! calls the helpers here and serializes the response.

use serde::{Deserialize, Serialize};

use crate::core::engine::Engine;
use crate::core::ledger::RiskLevel;
use crate::core::task::{Task, TaskRequest, TaskStatus};
use crate::core::SchedulerError;
use crate::util::types::{PartitionId, TaskId, Urgency, WorkerId};

/// Task submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Category name, e.g. `"security"` or `"docs"`.
    pub category: String,
    /// Urgency name: `critical`, `high`, `medium` or `low`.
    pub urgency: String,
    /// Estimated resource cost.
    pub estimated_cost: u64,
    /// Declared dependency count.
    #[serde(default)]
    pub dependency_count: u32,
}

impl TaskSubmission {
    /// Convert into a scheduler request, validating the urgency name.
    pub fn into_request(self) -> Result<TaskRequest, SchedulerError> {
        let urgency: Urgency = self.urgency.parse().map_err(SchedulerError::InvalidTask)?;
        Ok(TaskRequest::new(self.category, urgency, self.estimated_cost)
            .with_dependencies(self.dependency_count))
    }
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Priority score.
    pub priority: u8,
    /// Partition chosen at admission.
    pub partition: Option<PartitionId>,
    /// Worker holding the task.
    pub worker: Option<WorkerId>,
    /// Cost reported by the executor.
    pub actual_cost: Option<u64>,
    /// Optional reason for failure.
    pub reason: Option<String>,
}

impl From<&Task> for TaskStatusResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            priority: task.priority,
            partition: task.partition.clone(),
            worker: task.worker,
            actual_cost: task.actual_cost,
            reason: task.failure.clone(),
        }
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: budget not exhausted and runway not critical.
    pub ok: bool,
    /// Current budget epoch.
    pub epoch: u64,
    /// Queued tasks.
    pub queue_depth: usize,
    /// Admitted tasks waiting for a worker.
    pub pending_handoffs: usize,
    /// Warm workers.
    pub warm_workers: usize,
    /// Active workers.
    pub active_workers: usize,
    /// Unconsumed, unreserved budget across all partitions.
    pub budget_remaining: u64,
    /// Runway bucket.
    pub risk: RiskLevel,
}

/// Submit a task to the engine.
pub fn submit_task(engine: &Engine, req: TaskSubmission, now_ms: u128) -> Result<TaskStatusResponse, SchedulerError> {
    let id = engine.submit(req.into_request()?, now_ms)?;
    task_status(engine, id)
}

/// Look up a task in the live table, then in the archived history.
pub fn task_status(engine: &Engine, id: TaskId) -> Result<TaskStatusResponse, SchedulerError> {
    match engine.scheduler().task(id) {
        Ok(task) => Ok(TaskStatusResponse::from(&task)),
        Err(SchedulerError::TaskNotFound(_)) => engine
            .scheduler()
            .history()
            .iter()
            .rev()
            .find(|t| t.id == id)
            .map(TaskStatusResponse::from)
            .ok_or(SchedulerError::TaskNotFound(id)),
        Err(e) => Err(e),
    }
}

/// Engine health summary.
#[must_use]
pub fn health(engine: &Engine, now_ms: u128) -> Health {
    let status = engine.get_status(now_ms);
    let stats = engine.pool().stats();
    let budget_remaining = status.partitions.iter().map(|p| p.remaining).sum();
    Health {
        ok: !engine.ledger().is_globally_exhausted() && status.forecast.risk != RiskLevel::Critical,
        epoch: status.epoch,
        queue_depth: engine.scheduler().queue_len(),
        pending_handoffs: engine.scheduler().pending_handoffs().len(),
        warm_workers: stats.warm,
        active_workers: stats.active,
        budget_remaining,
        risk: status.forecast.risk,
    }
}
