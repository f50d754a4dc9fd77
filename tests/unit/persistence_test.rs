//! Tests for durable state and engine restore

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_budget_scheduler::builders::EngineBuilder;
use prometheus_budget_scheduler::config::{EngineConfig, PartitionConfig};
use prometheus_budget_scheduler::core::{
    Assignment, BudgetLedger, Engine, ExecutionOutcome, LedgerRecord, SchedulerError, TaskExecutor,
    TaskRequest, TaskStatus, WorkerState,
};
use prometheus_budget_scheduler::infra::{FileStore, InMemoryStore, StateStore, StoreError};
use prometheus_budget_scheduler::runtime::TokioSpawner;
use prometheus_budget_scheduler::util::{Category, TaskId, Urgency};

fn config() -> EngineConfig {
    EngineConfig {
        total_capacity: 5_000,
        partitions: vec![
            PartitionConfig::new("ops", [Category::Security, Category::Fix], 2, 2_000),
            PartitionConfig::new("docs", [Category::Documentation], 1, 1_000),
        ],
        ..EngineConfig::default()
    }
}

/// Store that refuses task writes while `failing` is set.
#[derive(Default)]
struct TaskWritesFail {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl TaskWritesFail {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StateStore for TaskWritesFail {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) && key.starts_with("task/") {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix)
    }
}

#[derive(Clone)]
struct CompleteAtEstimate;

#[async_trait]
impl TaskExecutor for CompleteAtEstimate {
    async fn execute(&self, assignment: Assignment) -> ExecutionOutcome {
        ExecutionOutcome::completed(assignment.estimated_cost)
    }
}

fn load_ledger(store: &dyn StateStore) -> LedgerRecord {
    serde_json::from_slice(&store.get("ledger").unwrap().unwrap()).unwrap()
}

/// Run maintenance cycles until `id` reaches a terminal status.
async fn run_until_settled(engine: &Engine, id: TaskId) -> TaskStatus {
    let spawner = TokioSpawner::try_current().unwrap();
    for step in 0..200 {
        engine.run_cycle(&CompleteAtEstimate, &spawner, 1_000 + step).await.unwrap();
        let status = engine.scheduler().task(id).unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    engine.scheduler().task(id).unwrap().status
}

#[test]
fn test_file_store_round_trips_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.put("task/a", b"{\"n\":1}").unwrap();
    store.put("task/b", b"{\"n\":2}").unwrap();
    store.put("ledger", b"{}").unwrap();

    assert_eq!(store.keys("task/").unwrap(), vec!["task/a", "task/b"]);
    assert_eq!(store.get("task/b").unwrap().as_deref(), Some(&b"{\"n\":2}"[..]));
    store.delete("task/a").unwrap();
    store.delete("task/a").unwrap();
    assert_eq!(store.keys("task/").unwrap(), vec!["task/b"]);
    assert!(store.put("../escape", b"x").is_err());
}

#[tokio::test]
async fn test_engine_restores_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let (done, running, admitted_docs, queued_docs) = {
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let engine = EngineBuilder::new(config()).with_store(store).build(0).unwrap();

        let done = engine.submit(TaskRequest::new("security", Urgency::High, 300), 1).unwrap();
        let running = engine.submit(TaskRequest::new("fix", Urgency::High, 400), 2).unwrap();
        let admitted_docs = engine.submit(TaskRequest::new("docs", Urgency::Low, 100), 3).unwrap();
        let queued_docs = engine.submit(TaskRequest::new("docs", Urgency::Low, 100), 4).unwrap();

        let report = engine.tick(5).await.unwrap();
        assert_eq!(report.admitted.len(), 3);
        for id in [done, running] {
            engine.scheduler().mark_running(id, 6).unwrap();
        }
        engine.report_outcome(done, TaskStatus::Completed, 250, 7).unwrap();
        (done, running, admitted_docs, queued_docs)
    };

    let store: Arc<dyn StateStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let engine = EngineBuilder::new(config()).with_store(store).build(100).unwrap();
    let scheduler = engine.scheduler();

    assert_eq!(scheduler.task(done).unwrap().status, TaskStatus::Completed);
    assert_eq!(scheduler.task(running).unwrap().status, TaskStatus::Running);
    assert_eq!(scheduler.task(admitted_docs).unwrap().status, TaskStatus::Assigned);
    assert_eq!(scheduler.undispatched(), vec![admitted_docs]);
    assert_eq!(scheduler.task(queued_docs).unwrap().status, TaskStatus::Queued);
    assert_eq!(scheduler.queue_len(), 1);
    assert_eq!(scheduler.in_flight("ops"), 1);
    assert_eq!(scheduler.in_flight("docs"), 1);

    let ops = engine.ledger().partition_status("ops").unwrap();
    assert_eq!(ops.consumed, 250);
    assert_eq!(ops.reserved, 400);

    let stats = engine.pool().stats();
    assert_eq!(stats.warm, 1);
    assert_eq!(stats.active, 2);

    // the restored running task closes out normally
    let closed = engine.report_outcome(running, TaskStatus::Completed, 380, 101).unwrap();
    assert_eq!(closed.status, TaskStatus::Completed);
    let ops = engine.ledger().partition_status("ops").unwrap();
    assert_eq!(ops.consumed, 630);
    assert_eq!(ops.reserved, 0);
    let worker = closed.worker.unwrap();
    assert_eq!(engine.pool().worker(worker).unwrap().state, WorkerState::Warm);
}

#[tokio::test]
async fn test_restored_queue_keeps_priority_order() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let (low, high) = {
        let engine = EngineBuilder::new(config())
            .with_store(Arc::clone(&store))
            .build(0)
            .unwrap();
        let low = engine.submit(TaskRequest::new("fix", Urgency::Low, 10), 1).unwrap();
        let high = engine.submit(TaskRequest::new("security", Urgency::Critical, 10), 2).unwrap();
        (low, high)
    };

    let engine = EngineBuilder::new(config()).with_store(store).build(10).unwrap();
    let order: Vec<_> = engine.scheduler().queue_snapshot().into_iter().map(|e| e.id).collect();
    assert_eq!(order, vec![high, low]);
    let report = engine.tick(11).await.unwrap();
    assert_eq!(report.admitted, vec![high, low]);
}

#[test]
fn test_fresh_store_gets_ledger_snapshot() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    EngineBuilder::new(config()).with_store(Arc::clone(&store)).build(0).unwrap();
    assert!(store.get("ledger").unwrap().is_some());
}

#[tokio::test]
async fn test_restored_assignment_runs_to_completion() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let id = {
        let engine = EngineBuilder::new(config())
            .with_store(Arc::clone(&store))
            .build(0)
            .unwrap();
        let id = engine.submit(TaskRequest::new("fix", Urgency::High, 400), 1).unwrap();
        engine.tick(2).await.unwrap();
        assert_eq!(engine.scheduler().task(id).unwrap().status, TaskStatus::Assigned);
        id
    };

    let engine = EngineBuilder::new(config()).with_store(store).build(10).unwrap();
    assert_eq!(engine.scheduler().undispatched(), vec![id]);
    assert_eq!(run_until_settled(&engine, id).await, TaskStatus::Completed);

    let ops = engine.ledger().partition_status("ops").unwrap();
    assert_eq!(ops.consumed, 400);
    assert_eq!(ops.reserved, 0);
    assert_eq!(engine.scheduler().in_flight("ops"), 0);
    assert_eq!(engine.pool().stats().active, 0);
    assert!(engine.scheduler().undispatched().is_empty());
}

#[tokio::test]
async fn test_unstarted_assignment_survives_failed_dispatch() {
    let store = Arc::new(TaskWritesFail::default());
    let engine = EngineBuilder::new(config())
        .with_store(Arc::clone(&store) as Arc<dyn StateStore>)
        .build(0)
        .unwrap();
    let id = engine.submit(TaskRequest::new("fix", Urgency::High, 400), 1).unwrap();
    let report = engine.tick(2).await.unwrap();
    let spawner = TokioSpawner::try_current().unwrap();

    store.set_failing(true);
    let err = engine
        .dispatch(report.assignments, &CompleteAtEstimate, &spawner, 3)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Persistence(_)));
    assert_eq!(engine.scheduler().task(id).unwrap().status, TaskStatus::Assigned);
    assert_eq!(engine.scheduler().undispatched(), vec![id]);

    store.set_failing(false);
    assert_eq!(run_until_settled(&engine, id).await, TaskStatus::Completed);
    assert_eq!(engine.ledger().partition_status("ops").unwrap().consumed, 400);
    assert_eq!(engine.scheduler().in_flight("ops"), 0);
}

#[tokio::test]
async fn test_failed_tick_keeps_stranded_assignment() {
    let store = Arc::new(TaskWritesFail::default());
    let shared: Arc<dyn StateStore> = Arc::clone(&store) as Arc<dyn StateStore>;
    let (assigned, queued) = {
        let engine = EngineBuilder::new(config())
            .with_store(Arc::clone(&shared))
            .build(0)
            .unwrap();
        let assigned = engine.submit(TaskRequest::new("fix", Urgency::High, 400), 1).unwrap();
        engine.tick(2).await.unwrap();
        let queued = engine.submit(TaskRequest::new("security", Urgency::High, 300), 3).unwrap();
        (assigned, queued)
    };

    let engine = EngineBuilder::new(config()).with_store(shared).build(10).unwrap();
    store.set_failing(true);
    assert!(matches!(engine.tick(11).await, Err(SchedulerError::Persistence(_))));
    assert_eq!(engine.scheduler().undispatched(), vec![assigned]);
    assert_eq!(engine.scheduler().task(queued).unwrap().status, TaskStatus::Queued);
    assert_eq!(engine.ledger().partition_status("ops").unwrap().reserved, 400);

    store.set_failing(false);
    let report = engine.tick(12).await.unwrap();
    let handed: HashSet<TaskId> = report.assignments.iter().map(|a| a.task_id).collect();
    assert_eq!(handed, HashSet::from([assigned, queued]));
}

#[tokio::test]
async fn test_orphaned_reservation_is_released_on_restore() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let id = {
        let engine = EngineBuilder::new(config())
            .with_store(Arc::clone(&store))
            .build(0)
            .unwrap();
        engine.submit(TaskRequest::new("fix", Urgency::High, 1_500), 1).unwrap()
    };
    // an admission whose ledger write landed but whose task write did not
    let ledger = BudgetLedger::restore(&config(), load_ledger(store.as_ref()))
        .unwrap()
        .with_store(Arc::clone(&store));
    ledger.reserve("ops", 1_500).unwrap().unwrap();
    assert_eq!(load_ledger(store.as_ref()).partitions[0].reservations.len(), 1);

    let engine = EngineBuilder::new(config()).with_store(Arc::clone(&store)).build(10).unwrap();
    assert_eq!(engine.ledger().partition_status("ops").unwrap().reserved, 0);
    assert!(load_ledger(store.as_ref()).partitions[0].reservations.is_empty());

    let report = engine.tick(11).await.unwrap();
    assert_eq!(report.admitted, vec![id]);
    assert_eq!(engine.ledger().partition_status("ops").unwrap().reserved, 1_500);
}

#[tokio::test]
async fn test_lost_reservation_is_readopted_on_restore() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
    let (id, reservation) = {
        let engine = EngineBuilder::new(config())
            .with_store(Arc::clone(&store))
            .build(0)
            .unwrap();
        let id = engine.submit(TaskRequest::new("fix", Urgency::High, 400), 1).unwrap();
        engine.tick(2).await.unwrap();
        (id, engine.scheduler().task(id).unwrap().reservation.unwrap())
    };
    // the ledger lost the reservation while the task record still holds it
    let mut record = load_ledger(store.as_ref());
    for account in &mut record.partitions {
        account.reservations.remove(&reservation.id);
    }
    store.put("ledger", &serde_json::to_vec(&record).unwrap()).unwrap();

    let engine = EngineBuilder::new(config()).with_store(store).build(10).unwrap();
    assert_eq!(engine.ledger().partition_status("ops").unwrap().reserved, 400);
    assert_eq!(run_until_settled(&engine, id).await, TaskStatus::Completed);
    let ops = engine.ledger().partition_status("ops").unwrap();
    assert_eq!(ops.consumed, 400);
    assert_eq!(ops.reserved, 0);
}
