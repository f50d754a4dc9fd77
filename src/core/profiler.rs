//! Bottleneck profiler: timed micro-benchmarks, threshold checks over the
//! ledger, pool and queue, and ranked remediation proposals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProfilerConfig;
use crate::core::ledger::{ExhaustionForecast, PartitionStatus};
use crate::core::scheduler::Scheduler;
use crate::core::task::Task;
use crate::infra::queue::{InMemoryQueue, QueuedTask, TaskQueue};
use crate::infra::store::{InMemoryStore, StateStore};
use crate::util::types::{Category, PartitionId, Urgency, WorkerId};

const PROBE_KEY: &str = "bench/probe";

/// Latency of one benchmarked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    /// Operation name.
    pub operation: String,
    /// Iterations timed.
    pub iterations: u32,
    /// Mean latency in microseconds.
    pub mean_us: f64,
    /// Slowest iteration in microseconds.
    pub max_us: f64,
}

/// Result of a benchmark battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Per-operation latencies.
    pub samples: Vec<LatencySample>,
    /// Wall-clock time for the whole battery in milliseconds.
    pub total_ms: f64,
    /// Operations that failed while being measured.
    pub errors: Vec<String>,
}

/// Bottleneck type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BottleneckKind {
    /// Budget consumed or nearly consumed.
    ResourceExhaustion,
    /// Worker cold starts giving up.
    SpawnFailure,
    /// Worker active past the slow threshold.
    SlowWorker,
    /// Queue serialized size past the threshold.
    OversizedBacklog,
}

/// Bottleneck severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Degrading.
    Warning,
    /// Failing or about to.
    Critical,
}

/// A detected condition that degrades throughput or risks failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// Type.
    pub kind: BottleneckKind,
    /// Resource identifier (`budget`, `partition/<name>`, `worker/<id>`, `queue`).
    pub resource: String,
    /// Observed metric.
    pub value: f64,
    /// Threshold the metric crossed.
    pub threshold: f64,
    /// Severity.
    pub severity: Severity,
}

/// Whether a recommendation may be applied without human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    /// Safe to auto-apply.
    Low,
    /// Needs approval.
    High,
}

/// Concrete remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RemediationAction {
    /// Retire a stuck worker and let the next hand-off cold start a new one.
    TerminateAndRespawn {
        /// Worker.
        worker: WorkerId,
    },
    /// Widen a partition from unallocated capacity.
    RaiseAllocation {
        /// Partition.
        partition: PartitionId,
        /// Amount to add.
        amount: u64,
    },
    /// Lower a partition's concurrent slot count.
    ReduceConcurrency {
        /// Partition.
        partition: PartitionId,
    },
    /// Shift allocation between partitions or raise total capacity.
    GlobalReallocation,
    /// Move finished tasks into history.
    ArchiveHistory,
    /// Check the worker initializer and its timeout.
    InspectWorkerStartup,
}

/// Ranked proposal derived from one bottleneck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Rank, 1 is most urgent.
    pub priority: u32,
    /// Bottleneck type this addresses.
    pub category: BottleneckKind,
    /// What to do.
    pub action: RemediationAction,
    /// Human-readable action.
    pub description: String,
    /// Expected improvement.
    pub expected_improvement: String,
    /// Approval requirement.
    pub risk: Risk,
}

/// Bottlenecks seen by one profiling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckSnapshot {
    /// When the cycle ran.
    pub at_ms: u128,
    /// What it found.
    pub bottlenecks: Vec<Bottleneck>,
}

/// Full profiling report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    /// When the report was generated.
    pub generated_at_ms: u128,
    /// Benchmark results.
    pub benchmark: BenchmarkReport,
    /// Detected bottlenecks.
    pub bottlenecks: Vec<Bottleneck>,
    /// Ranked recommendations.
    pub recommendations: Vec<Recommendation>,
    /// Worker reuse efficiency.
    pub reuse_efficiency: f64,
    /// Budget runway.
    pub forecast: ExhaustionForecast,
}

/// Periodic observer over the scheduler, its ledger and its pool.
pub struct Profiler {
    cfg: ProfilerConfig,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn StateStore>,
    history: Mutex<VecDeque<BottleneckSnapshot>>,
    spawn_failures_seen: AtomicU64,
}

impl Profiler {
    /// Create a profiler. Benchmarks hit a scratch in-memory store unless
    /// [`with_store`](Self::with_store) points them at the real one.
    pub fn new(cfg: ProfilerConfig, scheduler: Arc<Scheduler>) -> Self {
        Self {
            cfg,
            scheduler,
            store: Arc::new(InMemoryStore::new()),
            history: Mutex::new(VecDeque::new()),
            spawn_failures_seen: AtomicU64::new(0),
        }
    }

    /// Benchmark reads and writes against `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Time a fixed battery of representative operations.
    #[allow(clippy::cast_precision_loss)]
    pub fn run_benchmark(&self) -> BenchmarkReport {
        let iterations = self.cfg.benchmark_iterations.max(1);
        let started = Instant::now();
        let probe = Task::new(Category::Implementation, Urgency::Medium, 1_000, 2, 60, 0, 0);
        let mut errors = Vec::new();
        let mut samples = Vec::new();

        let encoded = match serde_json::to_vec(&probe) {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("serialize: {e}"));
                Vec::new()
            }
        };

        samples.push(time_op("serialize", iterations, || {
            serde_json::to_vec(&probe).map(drop).map_err(|e| e.to_string())
        }));
        samples.push(time_op("deserialize", iterations, || {
            serde_json::from_slice::<Task>(&encoded)
                .map(drop)
                .map_err(|e| e.to_string())
        }));
        samples.push(time_op("store_write", iterations, || {
            self.store.put(PROBE_KEY, &encoded).map_err(|e| e.to_string())
        }));
        samples.push(time_op("store_read", iterations, || {
            self.store.get(PROBE_KEY).map(drop).map_err(|e| e.to_string())
        }));
        if let Err(e) = self.store.delete(PROBE_KEY) {
            errors.push(format!("store cleanup: {e}"));
        }

        let mut queue = InMemoryQueue::new(iterations as usize);
        let entries: Vec<QueuedTask> = (0..u64::from(iterations))
            .map(|i| QueuedTask {
                id: uuid::Uuid::new_v4(),
                priority: u8::try_from(i % 101).unwrap_or(0),
                submitted_at_ms: u128::from(i),
                sequence: i,
                category: Category::Implementation,
                estimated_cost: 1,
            })
            .collect();
        let mut pending = entries.into_iter();
        samples.push(time_op("enqueue", iterations, || {
            pending
                .next()
                .map_or(Ok(()), |e| queue.enqueue(e).map_err(|e| e.to_string()))
        }));
        samples.push(time_op("dequeue", iterations, || {
            queue.dequeue().map(drop).ok_or_else(|| "queue drained early".to_string())
        }));

        for sample in &samples {
            if sample.iterations < iterations {
                errors.push(format!("{} stopped after {} iteration(s)", sample.operation, sample.iterations));
            }
        }
        let report = BenchmarkReport {
            samples,
            total_ms: started.elapsed().as_secs_f64() * 1_000.0,
            errors,
        };
        debug!(total_ms = report.total_ms, "benchmark battery finished");
        report
    }

    /// Apply the threshold rules to current state.
    #[allow(clippy::cast_precision_loss)]
    pub fn detect_bottlenecks(&self, now_ms: u128) -> Vec<Bottleneck> {
        let mut found = Vec::new();
        let ledger = self.scheduler.ledger();
        let pool = self.scheduler.pool();
        let near = f64::from(self.cfg.near_exhaustion_percent);

        if ledger.is_globally_exhausted() {
            found.push(Bottleneck {
                kind: BottleneckKind::ResourceExhaustion,
                resource: "budget".into(),
                value: ledger.utilization() * 100.0,
                threshold: 100.0,
                severity: Severity::Critical,
            });
        } else if ledger.utilization() * 100.0 > near {
            found.push(Bottleneck {
                kind: BottleneckKind::ResourceExhaustion,
                resource: "budget".into(),
                value: ledger.utilization() * 100.0,
                threshold: near,
                severity: Severity::Warning,
            });
        }

        for partition in ledger.status(now_ms).partitions {
            let used = partition_usage_percent(&partition);
            if used >= 100.0 {
                found.push(Bottleneck {
                    kind: BottleneckKind::ResourceExhaustion,
                    resource: format!("partition/{}", partition.name),
                    value: used,
                    threshold: 100.0,
                    severity: Severity::Critical,
                });
            } else if used > near {
                found.push(Bottleneck {
                    kind: BottleneckKind::ResourceExhaustion,
                    resource: format!("partition/{}", partition.name),
                    value: used,
                    threshold: near,
                    severity: Severity::Warning,
                });
            }
        }

        let slow_ms = self.cfg.slow_worker_ms();
        for worker in pool.active_since_before(now_ms.saturating_sub(slow_ms)) {
            let active_ms = worker
                .active_since_ms
                .map_or(0, |since| now_ms.saturating_sub(since));
            found.push(Bottleneck {
                kind: BottleneckKind::SlowWorker,
                resource: format!("worker/{}", worker.id),
                value: active_ms as f64 / 1_000.0,
                threshold: self.cfg.slow_worker_secs as f64,
                severity: if active_ms > slow_ms * 2 {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
            });
        }

        let queue_bytes = self.scheduler.queue_bytes();
        if queue_bytes > self.cfg.queue_bytes_threshold {
            found.push(Bottleneck {
                kind: BottleneckKind::OversizedBacklog,
                resource: "queue".into(),
                value: queue_bytes as f64,
                threshold: self.cfg.queue_bytes_threshold as f64,
                severity: if queue_bytes > self.cfg.queue_bytes_threshold * 2 {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
            });
        }

        let failures = pool
            .spawn_failures()
            .saturating_sub(self.spawn_failures_seen.load(Ordering::Acquire));
        if failures > 0 {
            found.push(Bottleneck {
                kind: BottleneckKind::SpawnFailure,
                resource: "pool".into(),
                value: failures as f64,
                threshold: 0.0,
                severity: Severity::Critical,
            });
        }

        found.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.kind.cmp(&b.kind)));
        found
    }

    /// Map bottlenecks to ranked remediation actions.
    ///
    /// Critical findings rank first; every bottleneck yields at least one
    /// proposal.
    #[must_use]
    pub fn recommend(&self, bottlenecks: &[Bottleneck]) -> Vec<Recommendation> {
        let mut ordered: Vec<&Bottleneck> = bottlenecks.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.kind.cmp(&b.kind)));

        let mut out = Vec::new();
        for b in ordered {
            for (action, description, expected_improvement, risk) in self.remediations(b) {
                out.push(Recommendation {
                    priority: 0,
                    category: b.kind,
                    action,
                    description,
                    expected_improvement,
                    risk,
                });
            }
        }
        for (rank, rec) in out.iter_mut().enumerate() {
            rec.priority = u32::try_from(rank + 1).unwrap_or(u32::MAX);
        }
        out
    }

    fn remediations(&self, b: &Bottleneck) -> Vec<(RemediationAction, String, String, Risk)> {
        match b.kind {
            BottleneckKind::SlowWorker => {
                let Some(worker) = b
                    .resource
                    .strip_prefix("worker/")
                    .and_then(|id| id.parse::<WorkerId>().ok())
                else {
                    return Vec::new();
                };
                vec![(
                    RemediationAction::TerminateAndRespawn { worker },
                    format!("terminate worker {worker} and respawn"),
                    format!("frees a slot held for {:.0}s", b.value),
                    Risk::High,
                )]
            }
            BottleneckKind::ResourceExhaustion => {
                if let Some(name) = b.resource.strip_prefix("partition/") {
                    let amount = self
                        .scheduler
                        .ledger()
                        .partition_status(name)
                        .map_or(0, |p| (p.allocation / 10).max(1));
                    vec![
                        (
                            RemediationAction::RaiseAllocation {
                                partition: name.to_string(),
                                amount,
                            },
                            format!("raise `{name}` allocation by {amount}"),
                            format!("about {amount} more budget for `{name}` admissions"),
                            Risk::Low,
                        ),
                        (
                            RemediationAction::ReduceConcurrency {
                                partition: name.to_string(),
                            },
                            format!("reduce concurrency in `{name}`"),
                            "slower burn in the partition".into(),
                            Risk::High,
                        ),
                    ]
                } else {
                    vec![(
                        RemediationAction::GlobalReallocation,
                        "reallocate budget or raise total capacity".into(),
                        "resumes admissions cluster-wide".into(),
                        Risk::High,
                    )]
                }
            }
            BottleneckKind::OversizedBacklog => vec![(
                RemediationAction::ArchiveHistory,
                "archive completed task history".into(),
                format!("queue is {:.0} bytes; archival shrinks the task table", b.value),
                Risk::Low,
            )],
            BottleneckKind::SpawnFailure => vec![(
                RemediationAction::InspectWorkerStartup,
                "inspect worker initialization and its timeout".into(),
                format!("{:.0} cold start(s) gave up since the last report", b.value),
                Risk::High,
            )],
        }
    }

    /// Benchmark, detect, recommend and record the cycle in the history ring.
    pub fn get_report(&self, now_ms: u128) -> ProfileReport {
        let benchmark = self.run_benchmark();
        let bottlenecks = self.detect_bottlenecks(now_ms);
        let recommendations = self.recommend(&bottlenecks);
        self.spawn_failures_seen
            .store(self.scheduler.pool().spawn_failures(), Ordering::Release);

        for b in &bottlenecks {
            warn!(kind = ?b.kind, resource = %b.resource, value = b.value, severity = ?b.severity, "bottleneck detected");
        }
        {
            let mut history = self.history.lock();
            if history.len() >= self.cfg.history_depth.max(1) {
                history.pop_front();
            }
            history.push_back(BottleneckSnapshot {
                at_ms: now_ms,
                bottlenecks: bottlenecks.clone(),
            });
        }

        ProfileReport {
            generated_at_ms: now_ms,
            benchmark,
            bottlenecks,
            recommendations,
            reuse_efficiency: self.scheduler.pool().reuse_efficiency(),
            forecast: self.scheduler.ledger().forecast_exhaustion(now_ms),
        }
    }

    /// Past profiling cycles, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<BottleneckSnapshot> {
        self.history.lock().iter().cloned().collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn partition_usage_percent(p: &PartitionStatus) -> f64 {
    if p.allocation == 0 {
        return if p.consumed + p.reserved > 0 { 100.0 } else { 0.0 };
    }
    (p.consumed + p.reserved) as f64 * 100.0 / p.allocation as f64
}

/// Run `op` up to `iterations` times, stopping at the first error.
#[allow(clippy::cast_precision_loss)]
fn time_op<F>(name: &str, iterations: u32, mut op: F) -> LatencySample
where
    F: FnMut() -> Result<(), String>,
{
    let mut total = 0.0;
    let mut max: f64 = 0.0;
    let mut done = 0;
    for _ in 0..iterations {
        let start = Instant::now();
        let result = op();
        let us = start.elapsed().as_secs_f64() * 1_000_000.0;
        if let Err(e) = result {
            warn!(operation = name, error = %e, "benchmark operation failed");
            break;
        }
        total += us;
        max = max.max(us);
        done += 1;
    }
    LatencySample {
        operation: name.to_string(),
        iterations: done,
        mean_us: if done == 0 { 0.0 } else { total / f64::from(done) },
        max_us: max,
    }
}
