//! Task records and their lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::ledger::Reservation;
use crate::core::SchedulerError;
use crate::util::types::{Category, PartitionId, TaskId, Urgency, WorkerId};

/// Status of a task in the scheduler lifecycle.
///
/// Allowed edges: `Queued -> Admitted -> Assigned -> Running -> Completed | Failed`,
/// plus `Queued | Admitted -> Cancelled`. Nothing leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for budget and a worker slot.
    Queued,
    /// Budget reserved; waiting for a worker.
    Admitted,
    /// Handed to a worker; the executor has not started it yet.
    Assigned,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Withdrawn before execution.
    Cancelled,
}

impl TaskStatus {
    /// All statuses.
    pub const ALL: [Self; 7] = [
        Self::Queued,
        Self::Admitted,
        Self::Assigned,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Whether the lifecycle permits `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Admitted | Self::Cancelled)
                | (Self::Admitted, Self::Assigned | Self::Cancelled)
                | (Self::Assigned, Self::Running)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the task holds a partition slot.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Admitted | Self::Assigned | Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Submission request from an upstream task creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Category name (aliases such as `scan` or `bug` accepted).
    pub category: String,
    /// Urgency.
    pub urgency: Urgency,
    /// Estimated resource cost; must be positive.
    pub estimated_cost: u64,
    /// Number of declared dependencies.
    #[serde(default)]
    pub dependency_count: u32,
}

impl TaskRequest {
    /// Build a request.
    pub fn new(category: impl Into<String>, urgency: Urgency, estimated_cost: u64) -> Self {
        Self {
            category: category.into(),
            urgency,
            estimated_cost,
            dependency_count: 0,
        }
    }

    /// Set the dependency count.
    #[must_use]
    pub const fn with_dependencies(mut self, dependency_count: u32) -> Self {
        self.dependency_count = dependency_count;
        self
    }
}

/// A unit of admissible work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Category.
    pub category: Category,
    /// Urgency.
    pub urgency: Urgency,
    /// Declared dependency count.
    pub dependency_count: u32,
    /// Estimated resource cost.
    pub estimated_cost: u64,
    /// Priority score, 0..=100.
    pub priority: u8,
    /// Submission order, used to break timestamp ties.
    pub sequence: u64,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Submission time.
    pub submitted_at_ms: u128,
    /// Admission time.
    pub admitted_at_ms: Option<u128>,
    /// Worker hand-off time.
    pub assigned_at_ms: Option<u128>,
    /// Execution start time.
    pub started_at_ms: Option<u128>,
    /// Completion, failure or cancellation time.
    pub finished_at_ms: Option<u128>,
    /// Partition chosen at admission.
    pub partition: Option<PartitionId>,
    /// Worker holding the task.
    pub worker: Option<WorkerId>,
    /// Open budget reservation.
    pub reservation: Option<Reservation>,
    /// Cost reported by the executor.
    pub actual_cost: Option<u64>,
    /// Failure detail, if any.
    pub failure: Option<String>,
}

impl Task {
    /// Create a queued task.
    #[must_use]
    pub fn new(
        category: Category,
        urgency: Urgency,
        estimated_cost: u64,
        dependency_count: u32,
        priority: u8,
        sequence: u64,
        now_ms: u128,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            category,
            urgency,
            dependency_count,
            estimated_cost,
            priority,
            sequence,
            status: TaskStatus::Queued,
            submitted_at_ms: now_ms,
            admitted_at_ms: None,
            assigned_at_ms: None,
            started_at_ms: None,
            finished_at_ms: None,
            partition: None,
            worker: None,
            reservation: None,
            actual_cost: None,
            failure: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(&mut self, next: TaskStatus, now_ms: u128) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            TaskStatus::Admitted => self.admitted_at_ms = Some(now_ms),
            TaskStatus::Assigned => self.assigned_at_ms = Some(now_ms),
            TaskStatus::Running => self.started_at_ms = Some(now_ms),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.finished_at_ms = Some(now_ms);
            }
            TaskStatus::Queued => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(Category::Fix, Urgency::Medium, 100, 0, 70, 1, 10)
    }

    #[test]
    fn test_happy_path_stamps_times() {
        let mut t = task();
        t.transition(TaskStatus::Admitted, 11).unwrap();
        t.transition(TaskStatus::Assigned, 12).unwrap();
        t.transition(TaskStatus::Running, 13).unwrap();
        t.transition(TaskStatus::Completed, 14).unwrap();
        assert_eq!(t.admitted_at_ms, Some(11));
        assert_eq!(t.started_at_ms, Some(13));
        assert_eq!(t.finished_at_ms, Some(14));
    }

    #[test]
    fn test_no_backward_edges() {
        let mut t = task();
        t.transition(TaskStatus::Admitted, 11).unwrap();
        t.transition(TaskStatus::Assigned, 12).unwrap();
        t.transition(TaskStatus::Running, 13).unwrap();
        let err = t.transition(TaskStatus::Queued, 14).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
        assert!(t.transition(TaskStatus::Cancelled, 14).is_err());
        assert_eq!(t.status, TaskStatus::Running);
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }
}
