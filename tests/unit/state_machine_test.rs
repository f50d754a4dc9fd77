//! Exhaustive task lifecycle tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_budget_scheduler::builders::EngineBuilder;
use prometheus_budget_scheduler::config::{EngineConfig, PartitionConfig};
use prometheus_budget_scheduler::core::{
    BottleneckKind, SchedulerError, Task, TaskRequest, TaskStatus, WorkerInitializer,
};
use prometheus_budget_scheduler::util::{Category, Urgency};

const EDGES: [(TaskStatus, TaskStatus); 7] = [
    (TaskStatus::Queued, TaskStatus::Admitted),
    (TaskStatus::Queued, TaskStatus::Cancelled),
    (TaskStatus::Admitted, TaskStatus::Assigned),
    (TaskStatus::Admitted, TaskStatus::Cancelled),
    (TaskStatus::Assigned, TaskStatus::Running),
    (TaskStatus::Running, TaskStatus::Completed),
    (TaskStatus::Running, TaskStatus::Failed),
];

fn task_in(status: TaskStatus) -> Task {
    let mut task = Task::new(Category::Test, Urgency::Medium, 10, 0, 50, 0, 0);
    task.status = status;
    task
}

#[test]
fn test_every_edge_is_checked() {
    for from in TaskStatus::ALL {
        for to in TaskStatus::ALL {
            let allowed = EDGES.contains(&(from, to));
            assert_eq!(from.can_transition_to(to), allowed, "{from} -> {to}");

            let mut task = task_in(from);
            let result = task.transition(to, 1);
            if allowed {
                assert!(result.is_ok(), "{from} -> {to} should pass");
                assert_eq!(task.status, to);
            } else {
                assert!(
                    matches!(result, Err(SchedulerError::InvalidTransition { .. })),
                    "{from} -> {to} should be refused"
                );
                assert_eq!(task.status, from);
            }
        }
    }
}

#[test]
fn test_terminal_states_have_no_exits() {
    for status in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
        assert!(TaskStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
    }
}

struct NeverReady;

#[async_trait]
impl WorkerInitializer for NeverReady {
    async fn initialize(&self, _category: Category, _partition: &str) -> Result<(), String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

fn stalled_config() -> EngineConfig {
    let mut cfg = EngineConfig {
        total_capacity: 1_000,
        partitions: vec![PartitionConfig::new("main", Category::ALL, 2, 1_000)],
        ..EngineConfig::default()
    };
    cfg.pool.spawn_timeout_ms = 10;
    cfg.pool.spawn_attempts = 2;
    cfg.pool.spawn_backoff_ms = 1;
    cfg
}

#[tokio::test]
async fn test_spawn_timeout_keeps_task_admitted_until_cancelled() {
    let engine = EngineBuilder::new(stalled_config())
        .with_initializer(Arc::new(NeverReady))
        .build(0)
        .unwrap();
    let id = engine.submit(TaskRequest::new("security", Urgency::High, 300), 0).unwrap();

    let report = engine.tick(1).await.unwrap();
    assert_eq!(report.admitted, vec![id]);
    assert!(report.assignments.is_empty());
    assert_eq!(report.pending_handoffs, 1);
    let task = engine.scheduler().task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Admitted);
    assert!(task.worker.is_none());
    assert_eq!(engine.ledger().partition_status("main").unwrap().reserved, 300);
    assert_eq!(engine.pool().spawn_failures(), 1);

    let bottlenecks = engine.profiler().detect_bottlenecks(2);
    assert!(bottlenecks.iter().any(|b| b.kind == BottleneckKind::SpawnFailure));

    let cancelled = engine.cancel(id, 3).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.reservation.is_none());
    assert_eq!(engine.ledger().partition_status("main").unwrap().reserved, 0);
    assert_eq!(engine.scheduler().in_flight("main"), 0);
    assert!(engine.scheduler().pending_handoffs().is_empty());

    // nothing left to retry
    let report = engine.tick(4).await.unwrap();
    assert!(report.assignments.is_empty());
    assert_eq!(report.pending_handoffs, 0);
}

#[tokio::test]
async fn test_running_task_cannot_be_cancelled() {
    let engine = EngineBuilder::new(EngineConfig::default()).build(0).unwrap();
    let id = engine.submit(TaskRequest::new("test", Urgency::Low, 10), 0).unwrap();
    engine.tick(1).await.unwrap();
    engine.scheduler().mark_running(id, 2).unwrap();

    assert!(matches!(
        engine.cancel(id, 3),
        Err(SchedulerError::InvalidTransition { .. })
    ));
    assert!(engine.report_outcome(id, TaskStatus::Cancelled, 0, 4).is_err());
    assert_eq!(engine.scheduler().task(id).unwrap().status, TaskStatus::Running);
}
