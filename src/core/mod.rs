//! Core scheduling abstractions and budget accounting.

pub mod audit;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod load_balancer;
pub mod profiler;
pub mod scheduler;
pub mod task;
pub mod worker_pool;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink,
    SharedMemoryAuditSink,
};
pub use engine::{CycleReport, DrainReport, Engine, OutcomeReport, TuneOutcome};
pub use error::{AppResult, SchedulerError};
pub use executor::{ExecutionOutcome, Spawn, TaskExecutor};
pub use ledger::{
    classify_risk, BudgetLedger, BudgetStatus, CommitReceipt, ExhaustionForecast, LedgerRecord,
    PartitionStatus, ReallocationOutcome, Reservation, RiskLevel, UsageForecast,
};
pub use load_balancer::LoadBalancer;
pub use profiler::{
    BenchmarkReport, Bottleneck, BottleneckKind, BottleneckSnapshot, LatencySample, ProfileReport,
    Profiler, Recommendation, RemediationAction, Risk, Severity,
};
pub use scheduler::{Assignment, DeferReason, Deferral, Scheduler, TickReport};
pub use task::{Task, TaskRequest, TaskStatus};
pub use worker_pool::{
    NoopInitializer, PoolStats, RetireReason, SweepReport, Worker, WorkerInitializer, WorkerPool,
    WorkerState,
};
