//! Background loop driving ticks, dispatch, sweeps and profiling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::engine::Engine;
use crate::core::executor::{Spawn, TaskExecutor};
use crate::util::clock::now_ms;

/// What the loop does besides scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceOptions {
    /// Produce a profiling report every `profiler.report_interval_secs`.
    pub profile: bool,
    /// Apply low-risk recommendations from each report.
    pub auto_tune: bool,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            profile: true,
            auto_tune: false,
        }
    }
}

/// Handle to a running maintenance loop.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the loop to stop and wait for its final drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "maintenance loop ended abnormally");
        }
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the maintenance loop on the current tokio runtime.
pub fn spawn_maintenance<E, S>(
    engine: Arc<Engine>,
    executor: E,
    spawner: S,
    options: MaintenanceOptions,
) -> MaintenanceHandle
where
    E: TaskExecutor,
    S: Spawn + Send + Sync + 'static,
{
    let (shutdown, rx) = watch::channel(false);
    let join = tokio::spawn(run(engine, executor, spawner, options, rx));
    MaintenanceHandle { shutdown, join }
}

/// Run cycles on the configured tick interval until `shutdown` flips to
/// `true` or its sender is dropped.
pub async fn run<E, S>(
    engine: Arc<Engine>,
    executor: E,
    spawner: S,
    options: MaintenanceOptions,
    mut shutdown: watch::Receiver<bool>,
) where
    E: TaskExecutor,
    S: Spawn + Send + Sync + 'static,
{
    let period = engine.config().scheduler.tick_interval().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let report_every = Duration::from_secs(engine.config().profiler.report_interval_secs.max(1));
    let mut reporter = tokio::time::interval_at(tokio::time::Instant::now() + report_every, report_every);
    reporter.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_ms = period.as_millis(), "maintenance loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.run_cycle(&executor, &spawner, now_ms()).await {
                    Ok(cycle) => debug!(
                        admitted = cycle.tick.admitted.len(),
                        deferred = cycle.tick.deferred,
                        dispatched = cycle.dispatched,
                        drained = cycle.drained.applied.len(),
                        retired = cycle.sweep.retired.len(),
                        "maintenance cycle"
                    ),
                    Err(e) => error!(error = %e, "maintenance cycle failed"),
                }
            }
            _ = reporter.tick(), if options.profile => {
                let report = engine.get_report(now_ms());
                info!(
                    bottlenecks = report.bottlenecks.len(),
                    recommendations = report.recommendations.len(),
                    reuse_efficiency = report.reuse_efficiency,
                    risk = ?report.forecast.risk,
                    "profiling report"
                );
                if options.auto_tune {
                    match engine.apply_low_risk(&report) {
                        Ok(tuned) => debug!(
                            applied = tuned.applied.len(),
                            awaiting_approval = tuned.awaiting_approval.len(),
                            "auto-tune pass"
                        ),
                        Err(e) => error!(error = %e, "auto-tune failed"),
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let drained = engine.drain_outcomes(now_ms());
    info!(drained = drained.applied.len(), "maintenance loop stopped");
}
