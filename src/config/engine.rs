//! Root engine configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::pool::{PartitionConfig, PoolPolicy};
use crate::config::tuning::{ForecastConfig, PriorityTable, ProfilerConfig};
use crate::core::AppResult;
use crate::util::types::Category;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "BUDGET_SCHEDULER_CONFIG";

/// Environment variable overriding the total budget capacity.
pub const TOTAL_CAPACITY_ENV: &str = "BUDGET_TOTAL_CAPACITY";

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Interval between scheduling ticks.
    pub tick_interval_ms: u64,
    /// Finished tasks kept in the bounded history store.
    pub history_capacity: usize,
    /// Maximum queued tasks before submissions are rejected.
    pub max_queue_depth: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            history_capacity: 1_000,
            max_queue_depth: 10_000,
        }
    }
}

impl SchedulerSettings {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Total consumable budget for an epoch.
    pub total_capacity: u64,
    /// Partition registry in declaration order.
    pub partitions: Vec<PartitionConfig>,
    /// Priority scoring table.
    #[serde(default)]
    pub priority: PriorityTable,
    /// Worker lifecycle policy.
    #[serde(default)]
    pub pool: PoolPolicy,
    /// Forecasting parameters.
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// Bottleneck thresholds.
    #[serde(default)]
    pub profiler: ProfilerConfig,
    /// Scheduler loop settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_capacity: 100_000,
            partitions: vec![
                PartitionConfig::new("default", Category::ALL, num_cpus::get().max(1), 80_000)
                    .with_pool_reserve(10_000),
            ],
            priority: PriorityTable::default(),
            pool: PoolPolicy::default(),
            forecast: ForecastConfig::default(),
            profiler: ProfilerConfig::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Validate every section and the cross-section budget invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_capacity == 0 {
            return Err("total_capacity must be greater than 0".into());
        }
        if self.partitions.is_empty() {
            return Err("at least one partition must be defined".into());
        }
        let mut seen = HashSet::new();
        let mut allocated: u64 = 0;
        for partition in &self.partitions {
            partition
                .validate()
                .map_err(|e| format!("partition `{}` invalid: {e}", partition.name))?;
            if !seen.insert(partition.name.as_str()) {
                return Err(format!("duplicate partition `{}`", partition.name));
            }
            allocated = allocated.saturating_add(partition.allocation());
        }
        if allocated > self.total_capacity {
            return Err(format!(
                "partition allocations ({allocated}) exceed total_capacity ({})",
                self.total_capacity
            ));
        }
        self.priority.validate().map_err(|e| format!("priority invalid: {e}"))?;
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.forecast.validate().map_err(|e| format!("forecast invalid: {e}"))?;
        self.profiler.validate().map_err(|e| format!("profiler invalid: {e}"))?;
        if self.scheduler.max_queue_depth == 0 {
            return Err("scheduler.max_queue_depth must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
    }

    /// Build configuration from the process environment.
    ///
    /// Loads `.env` if present, reads the file named by
    /// [`CONFIG_PATH_ENV`] (defaults otherwise) and applies the
    /// [`TOTAL_CAPACITY_ENV`] override.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(raw) = std::env::var(TOTAL_CAPACITY_ENV) {
            cfg.total_capacity = raw
                .trim()
                .parse()
                .with_context(|| format!("{TOTAL_CAPACITY_ENV} must be an integer, got `{raw}`"))?;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        tracing::debug!(
            total_capacity = cfg.total_capacity,
            partitions = cfg.partitions.len(),
            "engine configuration loaded from environment"
        );
        Ok(cfg)
    }

    /// Look up a partition by name.
    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.name == name)
    }
}
