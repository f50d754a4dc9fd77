//! Tests for error types

use prometheus_budget_scheduler::core::SchedulerError;
use prometheus_budget_scheduler::infra::StoreError;

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("depth 10".to_string());
    assert_eq!(format!("{err}"), "queue full: depth 10");
}

#[test]
fn test_spawn_timeout_error() {
    let err = SchedulerError::WorkerSpawnTimeout { attempts: 3 };
    assert_eq!(format!("{err}"), "worker spawn timed out after 3 attempt(s)");
}

#[test]
fn test_invalid_transition_error() {
    let err = SchedulerError::InvalidTransition {
        from: "running".into(),
        to: "queued".into(),
    };
    assert_eq!(format!("{err}"), "invalid transition from running to queued");
}

#[test]
fn test_recoverable_classification() {
    assert!(SchedulerError::BudgetExhausted("main".into()).is_recoverable());
    assert!(SchedulerError::WorkerSpawnTimeout { attempts: 1 }.is_recoverable());
    assert!(SchedulerError::ConcurrentModification("ledger".into()).is_recoverable());
    assert!(!SchedulerError::InvalidCost.is_recoverable());
    assert!(!SchedulerError::InvalidCategory("astrology".into()).is_recoverable());
    assert!(!SchedulerError::Persistence("disk full".into()).is_recoverable());
}

#[test]
fn test_store_error_becomes_persistence() {
    let err: SchedulerError = StoreError::InvalidKey("../etc".into()).into();
    assert!(matches!(err, SchedulerError::Persistence(msg) if msg.contains("../etc")));
}
