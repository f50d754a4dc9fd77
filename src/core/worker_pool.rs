//! Worker pool manager: reusable execution agents bound to a category and a
//! partition.
//!
//! Workers cycle `warm -> active -> warm` and end in `retired`. Each worker
//! record sits behind its own `parking_lot::Mutex`; the table itself is only
//! write-locked to insert or drop an entry, so acquiring one worker never
//! blocks releasing another. Idle workers wait in per-(category, partition)
//! deques; popping an id from a deque is what hands a worker to exactly one
//! caller.
//!
//! Cold starts go through a [`WorkerInitializer`] under a per-attempt timeout
//! with bounded, doubling backoff. Retirement of idle or worn-out workers
//! happens only in [`WorkerPool::sweep`], never on the acquire/release path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, PoolPolicy};
use crate::core::audit::{emit, AuditAction, SharedAuditSink};
use crate::core::SchedulerError;
use crate::infra::store::{self, StateStore};
use crate::util::types::{Category, PartitionId, TaskId, WorkerId};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Idle and ready for reuse.
    Warm,
    /// Holding exactly one task.
    Active,
    /// Terminal.
    Retired,
}

/// Why a worker was retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// Idle past the configured threshold.
    MaxAgeExceeded,
    /// Completed the configured number of tasks.
    MaxTasksExceeded,
    /// Retired by request (executor failure, operator action).
    Explicit,
}

/// A reusable execution agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Identifier.
    pub id: WorkerId,
    /// Category served.
    pub category: Category,
    /// Owning partition.
    pub partition: PartitionId,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Creation time.
    pub created_at_ms: u128,
    /// Last time the worker was acquired or released.
    pub last_used_ms: u128,
    /// When the current assignment began.
    pub active_since_ms: Option<u128>,
    /// Tasks completed over the worker's life.
    pub tasks_completed: u64,
    /// Resource consumed over the worker's life.
    pub tokens_consumed: u64,
    /// Task currently held.
    pub current_task: Option<TaskId>,
    /// Retirement reason.
    pub retire_reason: Option<RetireReason>,
    /// Retirement time.
    pub retired_at_ms: Option<u128>,
}

impl Worker {
    fn cold(category: Category, partition: &str, task: TaskId, now_ms: u128) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            category,
            partition: partition.to_string(),
            state: WorkerState::Active,
            created_at_ms: now_ms,
            last_used_ms: now_ms,
            active_since_ms: Some(now_ms),
            tasks_completed: 0,
            tokens_consumed: 0,
            current_task: Some(task),
            retire_reason: None,
            retired_at_ms: None,
        }
    }

    fn transition_error(&self, to: WorkerState) -> SchedulerError {
        SchedulerError::InvalidTransition {
            from: format!("{:?}", self.state).to_lowercase(),
            to: format!("{to:?}").to_lowercase(),
        }
    }
}

/// Cold-start hook, e.g. loading a model or opening a session.
#[async_trait]
pub trait WorkerInitializer: Send + Sync {
    /// Prepare a new worker. An error counts as a failed attempt.
    async fn initialize(&self, category: Category, partition: &str) -> Result<(), String>;
}

/// Initializer with nothing to prepare.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInitializer;

#[async_trait]
impl WorkerInitializer for NoopInitializer {
    async fn initialize(&self, _category: Category, _partition: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Result of a background sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workers retired by this sweep, with the reason.
    pub retired: Vec<(WorkerId, RetireReason)>,
    /// Retired workers purged from cold storage.
    pub purged: usize,
}

/// Pool counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Warm workers.
    pub warm: usize,
    /// Active workers.
    pub active: usize,
    /// Retired workers still in cold storage.
    pub retired: usize,
    /// Workers ever created.
    pub created: u64,
    /// Tasks completed across all workers.
    pub completed: u64,
    /// Acquisitions that exhausted every cold-start attempt.
    pub spawn_failures: u64,
    /// `(completed - created) / completed`.
    pub reuse_efficiency: f64,
}

type IdleKey = (Category, PartitionId);

/// Worker pool manager.
pub struct WorkerPool {
    policy: PoolPolicy,
    workers: RwLock<HashMap<WorkerId, Arc<Mutex<Worker>>>>,
    idle: Mutex<HashMap<IdleKey, VecDeque<WorkerId>>>,
    cold: Mutex<VecDeque<Worker>>,
    active: HashMap<PartitionId, AtomicUsize>,
    initializer: Arc<dyn WorkerInitializer>,
    store: Option<Arc<dyn StateStore>>,
    audit: Option<SharedAuditSink>,
    created: AtomicU64,
    completed: AtomicU64,
    spawn_failures: AtomicU64,
}

impl WorkerPool {
    /// Create an empty pool for the partitions in `cfg`.
    pub fn new(cfg: &EngineConfig, initializer: Arc<dyn WorkerInitializer>) -> Self {
        Self {
            policy: cfg.pool.clone(),
            workers: RwLock::new(HashMap::new()),
            idle: Mutex::new(HashMap::new()),
            cold: Mutex::new(VecDeque::new()),
            active: cfg
                .partitions
                .iter()
                .map(|p| (p.name.clone(), AtomicUsize::new(0)))
                .collect(),
            initializer,
            store: None,
            audit: None,
            created: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
        }
    }

    /// Persist worker records to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Load persisted workers. Warm workers return to the idle deques, active
    /// ones keep their task and wait for its outcome, retired ones go to cold
    /// storage.
    pub fn restore(&self, workers: Vec<Worker>) {
        let mut completed = 0;
        for worker in workers {
            completed += worker.tasks_completed;
            self.created.fetch_add(1, Ordering::Relaxed);
            match worker.state {
                WorkerState::Retired => {
                    self.cold.lock().push_back(worker);
                    continue;
                }
                WorkerState::Active => {
                    if let Some(counter) = self.active.get(&worker.partition) {
                        counter.fetch_add(1, Ordering::AcqRel);
                    }
                }
                WorkerState::Warm => {
                    self.idle
                        .lock()
                        .entry((worker.category, worker.partition.clone()))
                        .or_default()
                        .push_back(worker.id);
                }
            }
            self.workers
                .write()
                .insert(worker.id, Arc::new(Mutex::new(worker)));
        }
        self.completed.fetch_add(completed, Ordering::Relaxed);
    }

    fn persist(&self, worker: &Worker) -> Result<(), SchedulerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store::save_json(store.as_ref(), &store::worker_key(&worker.id), worker).map_err(|e| {
            error!(worker_id = %worker.id, error = %e, "failed to persist worker");
            SchedulerError::from(e)
        })
    }

    fn active_counter(&self, partition: &str) -> Result<&AtomicUsize, SchedulerError> {
        self.active
            .get(partition)
            .ok_or_else(|| SchedulerError::UnknownPartition(partition.to_string()))
    }

    fn entry(&self, id: WorkerId) -> Result<Arc<Mutex<Worker>>, SchedulerError> {
        self.workers
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::WorkerNotFound(id))
    }

    fn push_idle(&self, worker: &Worker) {
        self.idle
            .lock()
            .entry((worker.category, worker.partition.clone()))
            .or_default()
            .push_back(worker.id);
    }

    fn pop_idle(&self, category: Category, partition: &str) -> Option<WorkerId> {
        self.idle
            .lock()
            .get_mut(&(category, partition.to_string()))
            .and_then(VecDeque::pop_front)
    }

    /// Hand a worker of `category` in `partition` to `task`, already active.
    ///
    /// Reuses the longest-idle warm worker when one exists; otherwise cold
    /// starts a new one, retrying with backoff and failing with
    /// [`SchedulerError::WorkerSpawnTimeout`] once attempts run out.
    pub async fn acquire_warm(
        &self,
        category: Category,
        partition: &str,
        task: TaskId,
        now_ms: u128,
    ) -> Result<WorkerId, SchedulerError> {
        let counter = self.active_counter(partition)?;

        while let Some(id) = self.pop_idle(category, partition) {
            let Ok(entry) = self.entry(id) else {
                continue;
            };
            let mut worker = entry.lock();
            if worker.state != WorkerState::Warm {
                // retired between the pop and the lock
                continue;
            }
            let before = worker.clone();
            worker.state = WorkerState::Active;
            worker.current_task = Some(task);
            worker.last_used_ms = now_ms;
            worker.active_since_ms = Some(now_ms);
            if let Err(e) = self.persist(&worker) {
                *worker = before;
                drop(worker);
                self.idle
                    .lock()
                    .entry((category, partition.to_string()))
                    .or_default()
                    .push_front(id);
                return Err(e);
            }
            counter.fetch_add(1, Ordering::AcqRel);
            debug!(worker_id = %id, task_id = %task, partition, "warm worker reused");
            return Ok(id);
        }

        self.cold_start(category, partition, task, now_ms, counter)
            .await
    }

    async fn cold_start(
        &self,
        category: Category,
        partition: &str,
        task: TaskId,
        now_ms: u128,
        counter: &AtomicUsize,
    ) -> Result<WorkerId, SchedulerError> {
        let attempts = self.policy.spawn_attempts.max(1);
        let mut backoff = Duration::from_millis(self.policy.spawn_backoff_ms);
        for attempt in 1..=attempts {
            match tokio::time::timeout(
                self.policy.spawn_timeout(),
                self.initializer.initialize(category, partition),
            )
            .await
            {
                Ok(Ok(())) => {
                    let worker = Worker::cold(category, partition, task, now_ms);
                    let id = worker.id;
                    self.persist(&worker)?;
                    self.workers.write().insert(id, Arc::new(Mutex::new(worker)));
                    self.created.fetch_add(1, Ordering::Relaxed);
                    counter.fetch_add(1, Ordering::AcqRel);
                    info!(worker_id = %id, task_id = %task, %category, partition, attempt, "worker cold-started");
                    emit(self.audit.as_ref(), id.to_string(), Some(partition), AuditAction::Spawn, None);
                    return Ok(id);
                }
                Ok(Err(reason)) => {
                    warn!(%category, partition, attempt, %reason, "worker initialization failed");
                }
                Err(_) => {
                    warn!(%category, partition, attempt, timeout_ms = self.policy.spawn_timeout_ms, "worker initialization timed out");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
        error!(%category, partition, attempts, "giving up on worker cold start");
        Err(SchedulerError::WorkerSpawnTimeout { attempts })
    }

    /// Return an active worker to the warm pool after a completed task.
    pub fn release(&self, id: WorkerId, tokens: u64, now_ms: u128) -> Result<Worker, SchedulerError> {
        let entry = self.entry(id)?;
        let snapshot = {
            let mut worker = entry.lock();
            if worker.state != WorkerState::Active {
                return Err(worker.transition_error(WorkerState::Warm));
            }
            let before = worker.clone();
            worker.state = WorkerState::Warm;
            worker.current_task = None;
            worker.active_since_ms = None;
            worker.last_used_ms = now_ms;
            worker.tasks_completed += 1;
            worker.tokens_consumed = worker.tokens_consumed.saturating_add(tokens);
            if let Err(e) = self.persist(&worker) {
                *worker = before;
                return Err(e);
            }
            worker.clone()
        };
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.active.get(&snapshot.partition) {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        self.push_idle(&snapshot);
        debug!(worker_id = %id, tokens, tasks = snapshot.tasks_completed, "worker released");
        Ok(snapshot)
    }

    /// Return an active worker whose task was withdrawn before it started.
    ///
    /// Unlike [`release`](Self::release) nothing is counted as completed.
    pub fn release_unused(&self, id: WorkerId, now_ms: u128) -> Result<Worker, SchedulerError> {
        let entry = self.entry(id)?;
        let snapshot = {
            let mut worker = entry.lock();
            if worker.state != WorkerState::Active {
                return Err(worker.transition_error(WorkerState::Warm));
            }
            let before = worker.clone();
            worker.state = WorkerState::Warm;
            worker.current_task = None;
            worker.active_since_ms = None;
            worker.last_used_ms = now_ms;
            if let Err(e) = self.persist(&worker) {
                *worker = before;
                return Err(e);
            }
            worker.clone()
        };
        if let Some(counter) = self.active.get(&snapshot.partition) {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
        self.push_idle(&snapshot);
        debug!(worker_id = %id, "unused worker returned to the warm pool");
        Ok(snapshot)
    }

    /// Retire a worker. Retirement is terminal.
    pub fn retire(&self, id: WorkerId, reason: RetireReason, now_ms: u128) -> Result<Worker, SchedulerError> {
        let entry = self.entry(id)?;
        let (snapshot, was) = {
            let mut worker = entry.lock();
            if worker.state == WorkerState::Retired {
                return Err(worker.transition_error(WorkerState::Retired));
            }
            let before = worker.clone();
            let was = worker.state;
            worker.state = WorkerState::Retired;
            worker.current_task = None;
            worker.active_since_ms = None;
            worker.retire_reason = Some(reason);
            worker.retired_at_ms = Some(now_ms);
            if let Err(e) = self.persist(&worker) {
                *worker = before;
                return Err(e);
            }
            (worker.clone(), was)
        };
        self.workers.write().remove(&id);
        match was {
            WorkerState::Active => {
                if let Some(counter) = self.active.get(&snapshot.partition) {
                    counter.fetch_sub(1, Ordering::AcqRel);
                }
            }
            WorkerState::Warm => {
                if let Some(deque) = self
                    .idle
                    .lock()
                    .get_mut(&(snapshot.category, snapshot.partition.clone()))
                {
                    deque.retain(|w| *w != id);
                }
            }
            WorkerState::Retired => {}
        }
        self.cold.lock().push_back(snapshot.clone());
        warn!(worker_id = %id, partition = %snapshot.partition, ?reason, "worker retired");
        emit(
            self.audit.as_ref(),
            id.to_string(),
            Some(snapshot.partition.as_str()),
            AuditAction::Retire,
            Some(format!("{reason:?}")),
        );
        Ok(snapshot)
    }

    /// Retire idle or worn-out warm workers and purge old retired ones.
    ///
    /// Active workers are never touched here.
    pub fn sweep(&self, now_ms: u128) -> SweepReport {
        let idle_ms = self.policy.idle_threshold_ms();
        let mut due = Vec::new();
        {
            let idle = self.idle.lock();
            let workers = self.workers.read();
            for id in idle.values().flatten() {
                let Some(entry) = workers.get(id) else {
                    continue;
                };
                let worker = entry.lock();
                if worker.state != WorkerState::Warm {
                    continue;
                }
                if worker.tasks_completed >= self.policy.max_tasks_per_worker {
                    due.push((*id, RetireReason::MaxTasksExceeded));
                } else if now_ms.saturating_sub(worker.last_used_ms) > idle_ms {
                    due.push((*id, RetireReason::MaxAgeExceeded));
                }
            }
        }

        let mut report = SweepReport::default();
        for (id, reason) in due {
            match self.retire(id, reason, now_ms) {
                Ok(_) => report.retired.push((id, reason)),
                // acquired or retired by someone else in the meantime
                Err(e) => debug!(worker_id = %id, error = %e, "sweep skipped worker"),
            }
        }
        report.purged = self.purge_retired(now_ms);
        if !report.retired.is_empty() || report.purged > 0 {
            info!(retired = report.retired.len(), purged = report.purged, "pool sweep");
        }
        report
    }

    fn purge_retired(&self, now_ms: u128) -> usize {
        let retention = self.policy.retired_retention_ms();
        let mut cold = self.cold.lock();
        let before = cold.len();
        cold.retain(|w| {
            let expired = w
                .retired_at_ms
                .is_some_and(|at| now_ms.saturating_sub(at) > retention);
            if expired {
                if let Some(store) = &self.store {
                    if let Err(e) = store.delete(&store::worker_key(&w.id)) {
                        // keep it so the next sweep retries the delete
                        warn!(worker_id = %w.id, error = %e, "failed to purge worker record");
                        return true;
                    }
                }
            }
            !expired
        });
        before - cold.len()
    }

    /// Snapshot of a live (warm or active) worker.
    pub fn worker(&self, id: WorkerId) -> Result<Worker, SchedulerError> {
        Ok(self.entry(id)?.lock().clone())
    }

    /// Snapshots of every live worker.
    #[must_use]
    pub fn workers(&self) -> Vec<Worker> {
        self.workers.read().values().map(|w| w.lock().clone()).collect()
    }

    /// Snapshots of retired workers still in cold storage.
    #[must_use]
    pub fn retired(&self) -> Vec<Worker> {
        self.cold.lock().iter().cloned().collect()
    }

    /// Active workers in `partition`.
    #[must_use]
    pub fn active_count(&self, partition: &str) -> usize {
        self.active
            .get(partition)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Active workers whose current assignment began before `cutoff_ms`.
    #[must_use]
    pub fn active_since_before(&self, cutoff_ms: u128) -> Vec<Worker> {
        self.workers
            .read()
            .values()
            .filter_map(|w| {
                let worker = w.lock();
                let slow = worker.state == WorkerState::Active
                    && worker.active_since_ms.is_some_and(|t| t < cutoff_ms);
                if slow {
                    Some(worker.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Acquisitions that gave up on cold start.
    #[must_use]
    pub fn spawn_failures(&self) -> u64 {
        self.spawn_failures.load(Ordering::Relaxed)
    }

    /// `(completed - created) / completed`; zero before any completion.
    ///
    /// A worker that completes exactly one task contributes no reuse.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reuse_efficiency(&self) -> f64 {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        let created = self.created.load(Ordering::Relaxed);
        (completed as f64 - created as f64) / completed as f64
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (warm, active) = self
            .workers
            .read()
            .values()
            .fold((0, 0), |(w, a), entry| match entry.lock().state {
                WorkerState::Warm => (w + 1, a),
                WorkerState::Active => (w, a + 1),
                WorkerState::Retired => (w, a),
            });
        PoolStats {
            warm,
            active,
            retired: self.cold.lock().len(),
            created: self.created.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures(),
            reuse_efficiency: self.reuse_efficiency(),
        }
    }
}
