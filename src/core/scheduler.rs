//! Priority scheduler with budget-aware admission control.
//!
//! Submitted tasks wait in a priority queue. Each [`Scheduler::tick`] pulls
//! them in descending score order, reserves their estimated cost in a
//! partition that still has both budget and a free slot, and hands each
//! admitted task to a worker. Execution itself happens elsewhere; the
//! executor closes the loop through [`Scheduler::report_outcome`].
//!
//! Tasks live in a table of per-task mutexes. Lock order is task table, then
//! task, then ledger or pool. Nothing waits on a task lock while holding the
//! queue, the pending list or the undispatched list.
//!
//! An assigned task whose assignment never reached an executor (restored
//! after a restart, dropped by a failed tick, or refused by a failed
//! `mark_running`) goes on the undispatched list and is handed out again by
//! the next tick.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, PriorityTable};
use crate::core::audit::{emit, AuditAction, SharedAuditSink};
use crate::core::ledger::BudgetLedger;
use crate::core::load_balancer::LoadBalancer;
use crate::core::task::{Task, TaskRequest, TaskStatus};
use crate::core::worker_pool::{RetireReason, WorkerPool};
use crate::core::SchedulerError;
use crate::infra::queue::{InMemoryQueue, QueuedTask, TaskQueue};
use crate::infra::store::{self, StateStore};
use crate::util::types::{Category, PartitionId, TaskId, WorkerId};

/// A task handed to a worker, ready for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Task.
    pub task_id: TaskId,
    /// Worker holding the task.
    pub worker_id: WorkerId,
    /// Partition the budget is reserved in.
    pub partition: PartitionId,
    /// Task category.
    pub category: Category,
    /// Reserved estimate.
    pub estimated_cost: u64,
    /// Priority score.
    pub priority: u8,
}

/// Why a queued task was not admitted on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// A partition had a free slot but not enough unreserved budget.
    Budget,
    /// Every capable partition was at its slot limit.
    Slots,
    /// Consumption has reached total capacity.
    GlobalExhaustion,
}

/// One deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferral {
    /// Task left queued.
    pub task_id: TaskId,
    /// Why.
    pub reason: DeferReason,
}

/// Outcome of one scheduling step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tasks admitted by this tick, in admission order.
    pub admitted: Vec<TaskId>,
    /// Number of queued tasks left waiting.
    pub deferred: usize,
    /// Per-task deferral reasons.
    pub deferrals: Vec<Deferral>,
    /// Worker hand-offs made by this tick, including retried ones and
    /// assignments handed out again because they never started.
    pub assignments: Vec<Assignment>,
    /// Admitted tasks still waiting for a worker.
    pub pending_handoffs: usize,
}

enum Admission {
    Admitted,
    Stale,
    Deferred(DeferReason),
}

/// In-flight slot counter for one partition.
#[derive(Debug)]
struct Slots {
    max: usize,
    used: AtomicUsize,
}

impl Slots {
    fn try_take(&self) -> bool {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn give_back(&self) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Priority scheduler.
pub struct Scheduler {
    priority: PriorityTable,
    balancer: LoadBalancer,
    ledger: Arc<BudgetLedger>,
    pool: Arc<WorkerPool>,
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<Task>>>>,
    queue: Mutex<Box<dyn TaskQueue>>,
    pending: Mutex<VecDeque<TaskId>>,
    undispatched: Mutex<VecDeque<TaskId>>,
    slots: HashMap<PartitionId, Slots>,
    history: Mutex<VecDeque<Task>>,
    history_capacity: usize,
    sequence: AtomicU64,
    tick_lock: tokio::sync::Mutex<()>,
    store: Option<Arc<dyn StateStore>>,
    audit: Option<SharedAuditSink>,
}

impl Scheduler {
    /// Create a scheduler over a ledger and a pool built from the same `cfg`.
    pub fn new(cfg: &EngineConfig, ledger: Arc<BudgetLedger>, pool: Arc<WorkerPool>) -> Self {
        Self {
            priority: cfg.priority.clone(),
            balancer: LoadBalancer::new(cfg.partitions.clone()),
            ledger,
            pool,
            tasks: RwLock::new(HashMap::new()),
            queue: Mutex::new(Box::new(InMemoryQueue::new(cfg.scheduler.max_queue_depth))),
            pending: Mutex::new(VecDeque::new()),
            undispatched: Mutex::new(VecDeque::new()),
            slots: cfg
                .partitions
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        Slots {
                            max: p.max_workers,
                            used: AtomicUsize::new(0),
                        },
                    )
                })
                .collect(),
            history: Mutex::new(VecDeque::new()),
            history_capacity: cfg.scheduler.history_capacity,
            sequence: AtomicU64::new(0),
            tick_lock: tokio::sync::Mutex::new(()),
            store: None,
            audit: None,
        }
    }

    /// Replace the pending-task queue backend.
    #[must_use]
    pub fn with_queue(mut self, queue: Box<dyn TaskQueue>) -> Self {
        self.queue = Mutex::new(queue);
        self
    }

    /// Persist task records to `store`.
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

    /// Reload persisted tasks.
    ///
    /// Queued tasks go back on the queue, admitted ones onto the hand-off
    /// list and assigned ones onto the undispatched list; every in-flight
    /// task takes its slot back.
    pub fn restore(&self, mut tasks: Vec<Task>) {
        tasks.sort_by_key(|t| t.sequence);
        let mut table = self.tasks.write();
        let mut queue = self.queue.lock();
        let mut pending = self.pending.lock();
        let mut undispatched = self.undispatched.lock();
        for task in tasks {
            self.sequence.fetch_max(task.sequence + 1, Ordering::AcqRel);
            if task.status.is_in_flight() {
                if let Some(slots) = task.partition.as_ref().and_then(|p| self.slots.get(p)) {
                    slots.used.fetch_add(1, Ordering::AcqRel);
                }
            }
            match task.status {
                TaskStatus::Queued => queue.requeue(queue_entry(&task)),
                TaskStatus::Admitted => pending.push_back(task.id),
                TaskStatus::Assigned => undispatched.push_back(task.id),
                _ => {}
            }
            table.insert(task.id, Arc::new(Mutex::new(task)));
        }
        info!(
            tasks = table.len(),
            queued = queue.len(),
            pending = pending.len(),
            undispatched = undispatched.len(),
            "scheduler state restored"
        );
    }

    fn persist(&self, task: &Task) -> Result<(), SchedulerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store::save_json(store.as_ref(), &store::task_key(&task.id), task).map_err(|e| {
            error!(task_id = %task.id, error = %e, "failed to persist task");
            SchedulerError::from(e)
        })
    }

    fn entry(&self, id: TaskId) -> Result<Arc<Mutex<Task>>, SchedulerError> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::TaskNotFound(id))
    }

    fn free_slot(&self, partition: Option<&str>) {
        if let Some(slots) = partition.and_then(|p| self.slots.get(p)) {
            slots.give_back();
        }
    }

    /// Validate, score and enqueue a task.
    pub fn submit(&self, request: TaskRequest, now_ms: u128) -> Result<TaskId, SchedulerError> {
        let category: Category = request
            .category
            .parse()
            .map_err(SchedulerError::InvalidCategory)?;
        if request.estimated_cost == 0 {
            return Err(SchedulerError::InvalidCost);
        }
        let priority = self
            .priority
            .score(category, request.urgency, request.dependency_count)
            .ok_or_else(|| SchedulerError::InvalidCategory(format!("no priority base for `{category}`")))?;
        if !self.balancer.partitions().iter().any(|p| p.serves(category)) {
            return Err(SchedulerError::InvalidCategory(format!(
                "no partition serves `{category}`"
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let task = Task::new(
            category,
            request.urgency,
            request.estimated_cost,
            request.dependency_count,
            priority,
            sequence,
            now_ms,
        );
        let id = task.id;
        let entry = queue_entry(&task);
        self.persist(&task)?;
        self.tasks.write().insert(id, Arc::new(Mutex::new(task)));

        let queued = self.queue.lock().enqueue(entry);
        if let Err(e) = queued {
            self.tasks.write().remove(&id);
            self.delete_record(id);
            warn!(task_id = %id, error = %e, "task rejected");
            return Err(e);
        }
        info!(task_id = %id, %category, priority, cost = request.estimated_cost, "task submitted");
        emit(self.audit.as_ref(), id.to_string(), None, AuditAction::Submit, Some(priority.to_string()));
        Ok(id)
    }

    fn delete_record(&self, id: TaskId) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(&store::task_key(&id)) {
                warn!(task_id = %id, error = %e, "failed to delete task record");
            }
        }
    }

    /// Run one scheduling step.
    ///
    /// Admission and hand-off only; never waits on execution. Admission
    /// shortfalls are reported as deferrals, not errors. Only a failure to
    /// persist an admission is returned as an error, after putting every
    /// unadmitted task back on the queue.
    pub async fn tick(&self, now_ms: u128) -> Result<TickReport, SchedulerError> {
        let _serial = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let stranded: Vec<TaskId> = self.undispatched.lock().drain(..).collect();
        report
            .assignments
            .extend(stranded.into_iter().filter_map(|id| self.assignment_of(id)));

        let retry: Vec<TaskId> = self.pending.lock().drain(..).collect();
        for id in retry {
            self.hand_off_into(id, now_ms, &mut report).await;
        }

        if self.ledger.is_globally_exhausted() {
            let waiting = self.queue.lock().snapshot();
            report.deferrals = waiting
                .iter()
                .map(|e| Deferral {
                    task_id: e.id,
                    reason: DeferReason::GlobalExhaustion,
                })
                .collect();
            report.deferred = report.deferrals.len();
            report.pending_handoffs = self.pending.lock().len();
            warn!(deferred = report.deferred, "budget exhausted; admissions halted");
            return Ok(report);
        }

        let mut admitted = Vec::new();
        let mut waiting = Vec::new();
        let outcome = loop {
            let Some(entry) = self.queue.lock().dequeue() else {
                break Ok(());
            };
            match self.admit(&entry, now_ms) {
                Ok(Admission::Admitted) => admitted.push(entry.id),
                Ok(Admission::Stale) => {}
                Ok(Admission::Deferred(reason)) => {
                    debug!(task_id = %entry.id, ?reason, "task deferred");
                    report.deferrals.push(Deferral {
                        task_id: entry.id,
                        reason,
                    });
                    waiting.push(entry);
                }
                Err(e) => {
                    waiting.push(entry);
                    break Err(e);
                }
            }
        };
        {
            let mut queue = self.queue.lock();
            for entry in waiting {
                queue.requeue(entry);
            }
        }
        if let Err(e) = outcome {
            // already admitted ones still need a worker, already assigned
            // ones still need an executor
            self.pending.lock().extend(admitted);
            self.undispatched
                .lock()
                .extend(report.assignments.iter().map(|a| a.task_id));
            return Err(e);
        }

        report.admitted.clone_from(&admitted);
        for id in admitted {
            self.hand_off_into(id, now_ms, &mut report).await;
        }
        report.deferred = report.deferrals.len();
        report.pending_handoffs = self.pending.lock().len();
        if !report.admitted.is_empty() || !report.assignments.is_empty() {
            info!(
                admitted = report.admitted.len(),
                assigned = report.assignments.len(),
                deferred = report.deferred,
                pending = report.pending_handoffs,
                "scheduling tick"
            );
        }
        Ok(report)
    }

    fn admit(&self, entry: &QueuedTask, now_ms: u128) -> Result<Admission, SchedulerError> {
        let Ok(handle) = self.entry(entry.id) else {
            return Ok(Admission::Stale);
        };
        let mut task = handle.lock();
        if task.status != TaskStatus::Queued {
            return Ok(Admission::Stale);
        }
        let mut next = task.clone();
        next.transition(TaskStatus::Admitted, now_ms)?;

        let mut budget_short = false;
        for partition in self.balancer.rank(task.category, |p| self.pool.active_count(p)) {
            let Some(slots) = self.slots.get(&partition.name) else {
                continue;
            };
            if !slots.try_take() {
                continue;
            }
            let reservation = match self.ledger.reserve(&partition.name, task.estimated_cost) {
                Ok(Some(r)) => r,
                Ok(None) => {
                    slots.give_back();
                    budget_short = true;
                    continue;
                }
                Err(e) => {
                    slots.give_back();
                    return Err(e);
                }
            };
            next.partition = Some(partition.name.clone());
            next.reservation = Some(reservation.clone());
            if let Err(e) = self.persist(&next) {
                slots.give_back();
                if let Err(release) = self.ledger.release(&reservation) {
                    error!(task_id = %task.id, error = %release, "failed to undo reservation");
                }
                return Err(e);
            }
            *task = next;
            info!(
                task_id = %task.id,
                partition = %partition.name,
                cost = task.estimated_cost,
                priority = task.priority,
                "task admitted"
            );
            emit(
                self.audit.as_ref(),
                task.id.to_string(),
                Some(partition.name.as_str()),
                AuditAction::Admit,
                Some(task.estimated_cost.to_string()),
            );
            return Ok(Admission::Admitted);
        }
        Ok(Admission::Deferred(if budget_short {
            DeferReason::Budget
        } else {
            DeferReason::Slots
        }))
    }

    async fn hand_off_into(&self, id: TaskId, now_ms: u128, report: &mut TickReport) {
        match self.hand_off(id, now_ms).await {
            Ok(assignment) => report.assignments.push(assignment),
            // cancelled or archived meanwhile
            Err(SchedulerError::InvalidTransition { .. } | SchedulerError::TaskNotFound(_)) => {}
            Err(e) => {
                warn!(task_id = %id, error = %e, "worker hand-off failed; retrying next tick");
                self.pending.lock().push_back(id);
            }
        }
    }

    async fn hand_off(&self, id: TaskId, now_ms: u128) -> Result<Assignment, SchedulerError> {
        let handle = self.entry(id)?;
        let (category, partition) = {
            let task = handle.lock();
            if task.status != TaskStatus::Admitted {
                return Err(SchedulerError::InvalidTransition {
                    from: task.status.to_string(),
                    to: TaskStatus::Assigned.to_string(),
                });
            }
            let partition = task
                .partition
                .clone()
                .ok_or_else(|| SchedulerError::InvalidTask(format!("admitted task {id} has no partition")))?;
            (task.category, partition)
        };

        let worker = self.pool.acquire_warm(category, &partition, id, now_ms).await?;

        let mut task = handle.lock();
        let mut next = task.clone();
        let assigned = next.transition(TaskStatus::Assigned, now_ms).and_then(|()| {
            next.worker = Some(worker);
            self.persist(&next)
        });
        if let Err(e) = assigned {
            drop(task);
            if let Err(undo) = self.pool.release_unused(worker, now_ms) {
                warn!(worker_id = %worker, error = %undo, "failed to return unused worker");
            }
            return Err(e);
        }
        *task = next;
        let assignment = Assignment {
            task_id: id,
            worker_id: worker,
            partition: partition.clone(),
            category,
            estimated_cost: task.estimated_cost,
            priority: task.priority,
        };
        drop(task);
        info!(task_id = %id, worker_id = %worker, partition = %partition, "task assigned");
        emit(
            self.audit.as_ref(),
            id.to_string(),
            Some(partition.as_str()),
            AuditAction::Assign,
            Some(worker.to_string()),
        );
        Ok(assignment)
    }

    /// Rebuild the assignment of a task that is still assigned.
    fn assignment_of(&self, id: TaskId) -> Option<Assignment> {
        let handle = self.entry(id).ok()?;
        let task = handle.lock();
        if task.status != TaskStatus::Assigned {
            return None;
        }
        Some(Assignment {
            task_id: id,
            worker_id: task.worker?,
            partition: task.partition.clone()?,
            category: task.category,
            estimated_cost: task.estimated_cost,
            priority: task.priority,
        })
    }

    /// Hand an assignment that never started back to the next tick.
    pub fn return_undispatched(&self, id: TaskId) {
        let mut undispatched = self.undispatched.lock();
        if !undispatched.contains(&id) {
            undispatched.push_back(id);
        }
    }

    /// Assigned tasks waiting to be handed to an executor again.
    #[must_use]
    pub fn undispatched(&self) -> Vec<TaskId> {
        self.undispatched.lock().iter().copied().collect()
    }

    /// Record that the executor started an assigned task.
    pub fn mark_running(&self, id: TaskId, now_ms: u128) -> Result<Task, SchedulerError> {
        let handle = self.entry(id)?;
        let mut task = handle.lock();
        let mut next = task.clone();
        next.transition(TaskStatus::Running, now_ms)?;
        self.persist(&next)?;
        *task = next.clone();
        drop(task);
        debug!(task_id = %id, "task running");
        emit(self.audit.as_ref(), id.to_string(), next.partition.as_deref(), AuditAction::Start, None);
        Ok(next)
    }

    /// Close the loop on a running task.
    ///
    /// Commits the actual cost against the reservation, then returns the
    /// worker to the warm pool on success or retires it on failure.
    pub fn report_outcome(
        &self,
        id: TaskId,
        status: TaskStatus,
        actual_cost: u64,
        now_ms: u128,
    ) -> Result<Task, SchedulerError> {
        if !matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(SchedulerError::InvalidTransition {
                from: TaskStatus::Running.to_string(),
                to: status.to_string(),
            });
        }
        let handle = self.entry(id)?;
        let mut task = handle.lock();
        if !task.status.can_transition_to(status) {
            return Err(SchedulerError::InvalidTransition {
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }

        if let Some(reservation) = task.reservation.clone() {
            match self.ledger.commit(&reservation, actual_cost) {
                Ok(receipt) if receipt.delta > 0 => {
                    warn!(task_id = %id, delta = receipt.delta, "actual cost exceeded the estimate");
                }
                Ok(_) => {}
                // settled before a crash; the ledger record already has it
                Err(SchedulerError::ConcurrentModification(_)) => {
                    debug!(task_id = %id, "reservation already committed");
                }
                Err(e) => return Err(e),
            }
            task.reservation = None;
            task.actual_cost = Some(actual_cost);
        }

        let mut next = task.clone();
        next.transition(status, now_ms)?;
        next.actual_cost = Some(actual_cost);
        if status == TaskStatus::Failed {
            next.failure = Some("executor reported failure".into());
        }
        self.persist(&next)?;
        *task = next.clone();
        drop(task);

        self.free_slot(next.partition.as_deref());
        if let Some(worker) = next.worker {
            let result = if status == TaskStatus::Completed {
                self.pool.release(worker, actual_cost, now_ms)
            } else {
                self.pool.retire(worker, RetireReason::Explicit, now_ms)
            };
            if let Err(e) = result {
                warn!(task_id = %id, worker_id = %worker, error = %e, "worker bookkeeping failed");
            }
        }

        let action = if status == TaskStatus::Completed {
            info!(task_id = %id, actual_cost, "task completed");
            AuditAction::Complete
        } else {
            warn!(task_id = %id, actual_cost, "task failed");
            AuditAction::Fail
        };
        emit(
            self.audit.as_ref(),
            id.to_string(),
            next.partition.as_deref(),
            action,
            Some(actual_cost.to_string()),
        );
        Ok(next)
    }

    /// Withdraw a queued or admitted task, releasing any reservation.
    pub fn cancel(&self, id: TaskId, now_ms: u128) -> Result<Task, SchedulerError> {
        let handle = self.entry(id)?;
        let mut task = handle.lock();
        let from = task.status;
        if !from.can_transition_to(TaskStatus::Cancelled) {
            return Err(SchedulerError::InvalidTransition {
                from: from.to_string(),
                to: TaskStatus::Cancelled.to_string(),
            });
        }
        if let Some(reservation) = task.reservation.clone() {
            match self.ledger.release(&reservation) {
                Ok(()) | Err(SchedulerError::ConcurrentModification(_)) => {}
                Err(e) => return Err(e),
            }
            task.reservation = None;
        }
        let mut next = task.clone();
        next.transition(TaskStatus::Cancelled, now_ms)?;
        self.persist(&next)?;
        *task = next.clone();
        drop(task);

        match from {
            TaskStatus::Queued => {
                self.queue.lock().remove(&id);
            }
            TaskStatus::Admitted => {
                self.free_slot(next.partition.as_deref());
                self.pending.lock().retain(|t| *t != id);
            }
            _ => {}
        }
        info!(task_id = %id, %from, "task cancelled");
        emit(self.audit.as_ref(), id.to_string(), next.partition.as_deref(), AuditAction::Cancel, None);
        Ok(next)
    }

    /// Move finished tasks out of the table into the bounded history.
    pub fn archive_finished(&self) -> usize {
        let mut finished = Vec::new();
        {
            let mut table = self.tasks.write();
            let ids: Vec<TaskId> = table
                .iter()
                .filter(|(_, t)| t.lock().status.is_terminal())
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                if let Some(handle) = table.remove(&id) {
                    let task = handle.lock().clone();
                    finished.push(task);
                }
            }
        }
        finished.sort_by_key(|t| t.finished_at_ms);
        for task in &finished {
            self.delete_record(task.id);
        }
        let count = finished.len();
        let mut history = self.history.lock();
        for task in finished {
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            if self.history_capacity > 0 {
                history.push_back(task);
            }
        }
        if count > 0 {
            info!(archived = count, history = history.len(), "finished tasks archived");
        }
        count
    }

    /// Snapshot of a task still in the table.
    pub fn task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        let handle = self.entry(id)?;
        let task = handle.lock().clone();
        Ok(task)
    }

    /// Snapshots of every task in the table.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().values().map(|t| t.lock().clone()).collect()
    }

    /// Archived tasks, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Task> {
        self.history.lock().iter().cloned().collect()
    }

    /// Queued entries in the order a tick would consider them.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<QueuedTask> {
        self.queue.lock().snapshot()
    }

    /// Queued tasks.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Serialized size of the queue, as it would be persisted.
    #[must_use]
    pub fn queue_bytes(&self) -> usize {
        serde_json::to_vec(&self.queue_snapshot()).map_or(0, |b| b.len())
    }

    /// Admitted tasks waiting for a worker.
    #[must_use]
    pub fn pending_handoffs(&self) -> Vec<TaskId> {
        self.pending.lock().iter().copied().collect()
    }

    /// In-flight tasks holding a slot in `partition`.
    #[must_use]
    pub fn in_flight(&self, partition: &str) -> usize {
        self.slots
            .get(partition)
            .map_or(0, |s| s.used.load(Ordering::Acquire))
    }

    /// The ledger admissions are made against.
    #[must_use]
    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    /// The worker pool hand-offs draw from.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

fn queue_entry(task: &Task) -> QueuedTask {
    QueuedTask {
        id: task.id,
        priority: task.priority,
        submitted_at_ms: task.submitted_at_ms,
        sequence: task.sequence,
        category: task.category,
        estimated_cost: task.estimated_cost,
    }
}
