//! Tests for the API surface helpers

use prometheus_budget_scheduler::builders::EngineBuilder;
use prometheus_budget_scheduler::config::{EngineConfig, PartitionConfig};
use prometheus_budget_scheduler::core::{SchedulerError, TaskStatus};
use prometheus_budget_scheduler::runtime::{health, submit_task, task_status, TaskSubmission};
use prometheus_budget_scheduler::util::Category;

fn submission(category: &str, urgency: &str, cost: u64) -> TaskSubmission {
    TaskSubmission {
        category: category.into(),
        urgency: urgency.into(),
        estimated_cost: cost,
        dependency_count: 0,
    }
}

fn engine() -> prometheus_budget_scheduler::core::Engine {
    EngineBuilder::new(EngineConfig {
        total_capacity: 1_000,
        partitions: vec![PartitionConfig::new("main", Category::ALL, 2, 1_000)],
        ..EngineConfig::default()
    })
    .build(0)
    .unwrap()
}

#[test]
fn test_submission_deserializes_without_dependencies() {
    let req: TaskSubmission =
        serde_json::from_str(r#"{"category":"scan","urgency":"critical","estimated_cost":5}"#).unwrap();
    assert_eq!(req.dependency_count, 0);
    let request = req.into_request().unwrap();
    assert_eq!(request.estimated_cost, 5);
}

#[test]
fn test_submit_task_returns_queued_status() {
    let engine = engine();
    let response = submit_task(&engine, submission("security", "critical", 50), 1).unwrap();
    assert_eq!(response.status, TaskStatus::Queued);
    assert_eq!(response.priority, 100);
    assert!(response.worker.is_none());
}

#[test]
fn test_submit_task_rejects_bad_input() {
    let engine = engine();
    assert!(matches!(
        submit_task(&engine, submission("security", "someday", 50), 1),
        Err(SchedulerError::InvalidTask(_))
    ));
    assert!(matches!(
        submit_task(&engine, submission("astrology", "low", 50), 1),
        Err(SchedulerError::InvalidCategory(_))
    ));
    assert!(matches!(
        submit_task(&engine, submission("fix", "low", 0), 1),
        Err(SchedulerError::InvalidCost)
    ));
}

#[test]
fn test_status_falls_back_to_history() {
    let engine = engine();
    let response = submit_task(&engine, submission("docs", "low", 5), 1).unwrap();
    engine.cancel(response.task_id, 2).unwrap();
    assert_eq!(engine.scheduler().archive_finished(), 1);

    let archived = task_status(&engine, response.task_id).unwrap();
    assert_eq!(archived.status, TaskStatus::Cancelled);
    assert!(matches!(
        task_status(&engine, uuid::Uuid::new_v4()),
        Err(SchedulerError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_health_tracks_queue_and_workers() {
    let engine = engine();
    submit_task(&engine, submission("test", "high", 100), 1).unwrap();
    submit_task(&engine, submission("test", "high", 100), 2).unwrap();
    submit_task(&engine, submission("test", "high", 100), 3).unwrap();

    let before = health(&engine, 4);
    assert_eq!(before.queue_depth, 3);
    assert_eq!(before.active_workers, 0);
    assert_eq!(before.budget_remaining, 1_000);

    engine.tick(5).await.unwrap();
    let after = health(&engine, 6);
    assert_eq!(after.queue_depth, 1);
    assert_eq!(after.active_workers, 2);
    assert_eq!(after.budget_remaining, 800);
    assert_eq!(after.epoch, 0);
}
