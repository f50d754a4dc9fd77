//! Facade wiring the ledger, worker pool, scheduler and profiler together.
//!
//! Executors run outside the scheduler. [`Engine::dispatch`] spawns each
//! assignment on a [`Spawn`] implementation and funnels the outcome back over
//! a channel; [`Engine::drain_outcomes`] applies whatever has arrived. This
//! keeps `report_outcome` off the executor's task, so a slow store never
//! stalls execution.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::executor::{ExecutionOutcome, Spawn, TaskExecutor};
use crate::core::ledger::{BudgetLedger, BudgetStatus};
use crate::core::profiler::{ProfileReport, Profiler, RemediationAction, Recommendation, Risk};
use crate::core::scheduler::{Assignment, Scheduler, TickReport};
use crate::core::task::{Task, TaskRequest, TaskStatus};
use crate::core::worker_pool::{SweepReport, WorkerPool};
use crate::core::SchedulerError;
use crate::util::types::TaskId;

/// Outcome delivered by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Task the outcome belongs to.
    pub task_id: TaskId,
    /// What the executor observed.
    pub outcome: ExecutionOutcome,
}

/// Result of applying queued outcomes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Tasks closed out.
    pub applied: Vec<Task>,
    /// Outcomes put back for the next drain after a persistence failure.
    pub retried: usize,
    /// Outcomes discarded with the reason.
    pub rejected: Vec<(TaskId, String)>,
}

/// Result of acting on a profiling report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuneOutcome {
    /// Low-risk recommendations applied automatically.
    pub applied: Vec<Recommendation>,
    /// Low-risk recommendations that turned out to be no-ops.
    pub skipped: Vec<Recommendation>,
    /// Recommendations that need an operator.
    pub awaiting_approval: Vec<Recommendation>,
}

/// One maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Whether the budget epoch rolled over.
    pub epoch_rolled: bool,
    /// Outcomes applied before scheduling.
    pub drained: DrainReport,
    /// Scheduling step.
    pub tick: TickReport,
    /// Assignments spawned on the executor.
    pub dispatched: usize,
    /// Idle and capped workers retired.
    pub sweep: SweepReport,
}

/// Budget-aware scheduling engine.
pub struct Engine {
    config: EngineConfig,
    scheduler: Arc<Scheduler>,
    profiler: Profiler,
    outcomes_tx: Sender<OutcomeReport>,
    outcomes_rx: Receiver<OutcomeReport>,
}

impl Engine {
    /// Assemble an engine from already-built parts.
    ///
    /// Most callers want [`EngineBuilder`](crate::builders::EngineBuilder),
    /// which also restores persisted state.
    #[must_use]
    pub fn from_parts(config: EngineConfig, scheduler: Arc<Scheduler>, profiler: Profiler) -> Self {
        let (outcomes_tx, outcomes_rx) = unbounded();
        Self {
            config,
            scheduler,
            profiler,
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Configuration the engine was built from.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The budget ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        self.scheduler.ledger()
    }

    /// The worker pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.scheduler.pool()
    }

    /// The profiler.
    #[must_use]
    pub const fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Submit a task for scheduling.
    pub fn submit(&self, request: TaskRequest, now_ms: u128) -> Result<TaskId, SchedulerError> {
        self.scheduler.submit(request, now_ms)
    }

    /// Withdraw a queued or admitted task.
    pub fn cancel(&self, id: TaskId, now_ms: u128) -> Result<Task, SchedulerError> {
        self.scheduler.cancel(id, now_ms)
    }

    /// Run one scheduling step.
    pub async fn tick(&self, now_ms: u128) -> Result<TickReport, SchedulerError> {
        self.scheduler.tick(now_ms).await
    }

    /// Sender executors outside [`dispatch`](Self::dispatch) can report on.
    #[must_use]
    pub fn outcome_sender(&self) -> Sender<OutcomeReport> {
        self.outcomes_tx.clone()
    }

    /// Mark each assignment running and hand it to `executor` on `spawner`.
    ///
    /// Returns how many were spawned. An assignment that is no longer
    /// assigned (already started, or archived) is skipped. One that cannot be
    /// marked running because its record failed to persist goes back to the
    /// scheduler for the next tick, and the first such error is returned
    /// after the rest of the batch has been dispatched.
    pub fn dispatch<E, S>(
        &self,
        assignments: Vec<Assignment>,
        executor: &E,
        spawner: &S,
        now_ms: u128,
    ) -> Result<usize, SchedulerError>
    where
        E: TaskExecutor,
        S: Spawn,
    {
        let mut spawned = 0;
        let mut failure = None;
        for assignment in assignments {
            match self.scheduler.mark_running(assignment.task_id, now_ms) {
                Ok(_) => {}
                Err(e @ SchedulerError::Persistence(_)) => {
                    warn!(task_id = %assignment.task_id, error = %e, "assignment not started; kept for the next tick");
                    self.scheduler.return_undispatched(assignment.task_id);
                    failure.get_or_insert(e);
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %assignment.task_id, error = %e, "assignment skipped");
                    continue;
                }
            }
            let executor = executor.clone();
            let tx = self.outcomes_tx.clone();
            spawner.spawn(async move {
                let task_id = assignment.task_id;
                let outcome = executor.execute(assignment).await;
                if tx.send(OutcomeReport { task_id, outcome }).is_err() {
                    warn!(task_id = %task_id, "engine dropped before outcome was reported");
                }
            });
            spawned += 1;
        }
        failure.map_or(Ok(spawned), Err)
    }

    /// Report a finished task directly.
    pub fn report_outcome(&self, id: TaskId, status: TaskStatus, actual_cost: u64, now_ms: u128) -> Result<Task, SchedulerError> {
        self.scheduler.report_outcome(id, status, actual_cost, now_ms)
    }

    /// Apply every outcome received so far.
    ///
    /// Outcomes that fail to persist go back on the channel and are retried
    /// on the next drain.
    pub fn drain_outcomes(&self, now_ms: u128) -> DrainReport {
        let received: Vec<OutcomeReport> = self.outcomes_rx.try_iter().collect();
        let mut report = DrainReport::default();
        for item in received {
            match self
                .scheduler
                .report_outcome(item.task_id, item.outcome.status, item.outcome.actual_cost, now_ms)
            {
                Ok(task) => report.applied.push(task),
                Err(e @ SchedulerError::Persistence(_)) => {
                    warn!(task_id = %item.task_id, error = %e, "outcome deferred to next drain");
                    // the receiver lives in self, so this cannot fail
                    let _ = self.outcomes_tx.send(item);
                    report.retried += 1;
                }
                Err(e) => {
                    warn!(task_id = %item.task_id, error = %e, "outcome rejected");
                    report.rejected.push((item.task_id, e.to_string()));
                }
            }
        }
        if !report.applied.is_empty() {
            debug!(applied = report.applied.len(), "outcomes drained");
        }
        report
    }

    /// Budget summary.
    #[must_use]
    pub fn get_status(&self, now_ms: u128) -> BudgetStatus {
        self.ledger().status(now_ms)
    }

    /// Profiling report.
    #[must_use]
    pub fn get_report(&self, now_ms: u128) -> ProfileReport {
        self.profiler.get_report(now_ms)
    }

    /// Apply the low-risk recommendations of `report`.
    ///
    /// Everything else is returned untouched for an operator to approve.
    pub fn apply_low_risk(&self, report: &ProfileReport) -> Result<TuneOutcome, SchedulerError> {
        let mut outcome = TuneOutcome::default();
        for rec in &report.recommendations {
            if rec.risk != Risk::Low {
                outcome.awaiting_approval.push(rec.clone());
                continue;
            }
            let applied = match &rec.action {
                RemediationAction::RaiseAllocation { partition, amount } => {
                    self.ledger().grow_allocation(partition, *amount)?
                }
                RemediationAction::ArchiveHistory => self.scheduler.archive_finished() > 0,
                _ => {
                    outcome.awaiting_approval.push(rec.clone());
                    continue;
                }
            };
            if applied {
                info!(action = ?rec.action, "recommendation applied");
                outcome.applied.push(rec.clone());
            } else {
                debug!(action = ?rec.action, "recommendation had nothing to do");
                outcome.skipped.push(rec.clone());
            }
        }
        Ok(outcome)
    }

    /// Retire idle and capped workers.
    pub fn sweep(&self, now_ms: u128) -> SweepReport {
        self.pool().sweep(now_ms)
    }

    /// One maintenance pass: roll the epoch if due, apply outcomes, schedule,
    /// dispatch, then sweep the pool.
    pub async fn run_cycle<E, S>(&self, executor: &E, spawner: &S, now_ms: u128) -> Result<CycleReport, SchedulerError>
    where
        E: TaskExecutor,
        S: Spawn,
    {
        let epoch_rolled = self.ledger().maybe_roll_epoch(now_ms)?;
        let drained = self.drain_outcomes(now_ms);
        let mut tick = self.tick(now_ms).await?;
        let dispatched = self.dispatch(std::mem::take(&mut tick.assignments), executor, spawner, now_ms)?;
        let sweep = self.sweep(now_ms);
        Ok(CycleReport {
            epoch_rolled,
            drained,
            tick,
            dispatched,
            sweep,
        })
    }
}
