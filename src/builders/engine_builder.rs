//! Assembles an [`Engine`] from configuration, restoring persisted state.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::audit::{AuditSink, SharedAuditSink};
use crate::core::engine::Engine;
use crate::core::ledger::{BudgetLedger, LedgerRecord};
use crate::core::profiler::Profiler;
use crate::core::scheduler::Scheduler;
use crate::core::task::{Task, TaskStatus};
use crate::core::worker_pool::{NoopInitializer, Worker, WorkerInitializer, WorkerPool};
use crate::core::SchedulerError;
use crate::infra::queue::TaskQueue;
use crate::infra::store::{self, StateStore, LEDGER_KEY, TASK_PREFIX, WORKER_PREFIX};

/// Builder for [`Engine`].
///
/// ```rust,ignore
/// let engine = EngineBuilder::new(EngineConfig::from_env()?)
///     .with_store(Arc::new(FileStore::open("./state")?))
///     .with_initializer(Arc::new(ModelLoader::default()))
///     .build(now_ms())?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn StateStore>>,
    audit: Option<SharedAuditSink>,
    initializer: Arc<dyn WorkerInitializer>,
    queue: Option<Box<dyn TaskQueue>>,
    benchmark_store: bool,
}

impl EngineBuilder {
    /// Start from `config` with no persistence and a no-op initializer.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            audit: None,
            initializer: Arc::new(NoopInitializer),
            queue: None,
            benchmark_store: false,
        }
    }

    /// Persist and restore state through `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Record lifecycle events to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(sink)));
        self
    }

    /// Cold-start hook for new workers.
    #[must_use]
    pub fn with_initializer(mut self, initializer: Arc<dyn WorkerInitializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Replace the in-memory pending queue.
    #[must_use]
    pub fn with_queue(mut self, queue: Box<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Point profiler benchmarks at the configured store instead of a
    /// scratch one.
    #[must_use]
    pub const fn benchmark_against_store(mut self, enabled: bool) -> Self {
        self.benchmark_store = enabled;
        self
    }

    /// Validate configuration, reload persisted records and wire the engine.
    pub fn build(self, now_ms: u128) -> Result<Engine, SchedulerError> {
        let cfg = self.config;
        cfg.validate().map_err(SchedulerError::InvalidConfig)?;

        let (ledger, workers, tasks) = match &self.store {
            Some(s) => {
                let record = store::load_json::<LedgerRecord>(s.as_ref(), LEDGER_KEY)?;
                let restored = record.is_some();
                let ledger = match record {
                    Some(record) => BudgetLedger::restore(&cfg, record)?,
                    None => BudgetLedger::new(&cfg, now_ms)?,
                }
                .with_store(Arc::clone(s));
                if !restored {
                    ledger.persist()?;
                }
                let workers: Vec<Worker> = store::load_all(s.as_ref(), WORKER_PREFIX)?;
                let tasks: Vec<Task> = store::load_all(s.as_ref(), TASK_PREFIX)?;
                (ledger, workers, tasks)
            }
            None => (BudgetLedger::new(&cfg, now_ms)?, Vec::new(), Vec::new()),
        };
        let ledger = match &self.audit {
            Some(a) => ledger.with_audit(Arc::clone(a)),
            None => ledger,
        };
        reconcile_reservations(&ledger, &tasks)?;
        let ledger = Arc::new(ledger);

        let mut pool = WorkerPool::new(&cfg, self.initializer);
        if let Some(s) = &self.store {
            pool = pool.with_store(Arc::clone(s));
        }
        if let Some(a) = &self.audit {
            pool = pool.with_audit(Arc::clone(a));
        }
        let pool = Arc::new(pool);
        let restored_workers = workers.len();
        pool.restore(workers);

        let mut scheduler = Scheduler::new(&cfg, Arc::clone(&ledger), Arc::clone(&pool));
        if let Some(queue) = self.queue {
            scheduler = scheduler.with_queue(queue);
        }
        if let Some(s) = &self.store {
            scheduler = scheduler.with_store(Arc::clone(s));
        }
        if let Some(a) = &self.audit {
            scheduler = scheduler.with_audit(Arc::clone(a));
        }
        let restored_tasks = tasks.len();
        scheduler.restore(tasks);
        let scheduler = Arc::new(scheduler);

        let mut profiler = Profiler::new(cfg.profiler.clone(), Arc::clone(&scheduler));
        if self.benchmark_store {
            if let Some(s) = &self.store {
                profiler = profiler.with_store(Arc::clone(s));
            }
        }

        info!(
            partitions = cfg.partitions.len(),
            total_capacity = cfg.total_capacity,
            epoch = ledger.epoch(),
            restored_workers,
            restored_tasks,
            "engine built"
        );
        Ok(Engine::from_parts(cfg, scheduler, profiler))
    }
}

/// Make the ledger's open reservations match the restored task records.
///
/// The ledger snapshot and a task record are separate writes, so a crash can
/// land between them. A reservation no in-flight task owns is released. A
/// reservation an admitted or assigned task owns but the ledger lacks is put
/// back; running tasks are left alone since their commit may already be in
/// the ledger.
fn reconcile_reservations(ledger: &BudgetLedger, tasks: &[Task]) -> Result<(), SchedulerError> {
    let owned: Vec<_> = tasks
        .iter()
        .filter(|t| t.status.is_in_flight())
        .filter_map(|t| t.reservation.as_ref().map(|r| (t.status, r)))
        .collect();
    let known = ledger.reservation_ids();
    for (status, reservation) in &owned {
        if matches!(status, TaskStatus::Admitted | TaskStatus::Assigned) && !known.contains(&reservation.id) {
            ledger.adopt_reservation(reservation)?;
        }
    }
    let referenced: HashSet<Uuid> = owned.iter().map(|(_, r)| r.id).collect();
    let freed = ledger.release_unreferenced(&referenced)?;
    if freed > 0 {
        info!(freed, "orphaned reservations released on restore");
    }
    Ok(())
}
