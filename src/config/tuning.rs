//! Tunables for priority scoring, forecasting and bottleneck profiling.
//!
//! The priority constants (category bases, urgency modifiers and the
//! per-dependency penalty) are heuristics. They ship as defaults and can be
//! overridden per deployment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::types::{Category, Urgency};

/// Lookup table behind the priority score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PriorityTable {
    /// Base score per category.
    pub category_base: BTreeMap<Category, i32>,
    /// Modifier added per urgency.
    pub urgency_modifier: BTreeMap<Urgency, i32>,
    /// Subtracted once per declared dependency.
    pub dependency_penalty: i32,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            category_base: BTreeMap::from([
                (Category::Security, 80),
                (Category::Fix, 70),
                (Category::Implementation, 60),
                (Category::Test, 50),
                (Category::Documentation, 40),
            ]),
            urgency_modifier: BTreeMap::from([
                (Urgency::Critical, 40),
                (Urgency::High, 20),
                (Urgency::Medium, 0),
                (Urgency::Low, -10),
            ]),
            dependency_penalty: 5,
        }
    }
}

impl PriorityTable {
    /// Compute the clamped 0..=100 priority score.
    ///
    /// Returns `None` when the category has no base score configured.
    #[must_use]
    pub fn score(&self, category: Category, urgency: Urgency, dependency_count: u32) -> Option<u8> {
        let base = *self.category_base.get(&category)?;
        let modifier = self.urgency_modifier.get(&urgency).copied().unwrap_or(0);
        let deps = i64::from(dependency_count);
        let raw = i64::from(base) + i64::from(modifier) - i64::from(self.dependency_penalty) * deps;
        let clamped = raw.clamp(0, 100);
        u8::try_from(clamped).ok()
    }

    /// Validate table values.
    pub fn validate(&self) -> Result<(), String> {
        if self.category_base.is_empty() {
            return Err("priority table must define at least one category base".into());
        }
        if self.dependency_penalty < 0 {
            return Err("dependency_penalty must not be negative".into());
        }
        Ok(())
    }
}

/// Usage forecasting and exhaustion-risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Declared burn rate in tokens/hour keyed by burn category.
    pub burn_rates: BTreeMap<String, u64>,
    /// Ledger-wide burn rate used until enough consumption has been observed.
    pub default_burn_rate_per_hour: u64,
    /// Half-width of the prediction interval, in percent of the point estimate.
    pub interval_percent: u32,
    /// Below this many hours remaining the exhaustion risk is critical.
    pub critical_hours: f64,
    /// Below this many hours remaining the exhaustion risk is high.
    pub high_hours: f64,
    /// Below this many hours remaining the exhaustion risk is medium.
    pub medium_hours: f64,
    /// Minimum epoch age before the observed burn rate replaces the default.
    pub min_observation_secs: u64,
    /// Length of a budget epoch; zero disables automatic rollover.
    pub epoch_length_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            burn_rates: BTreeMap::from([
                ("development".to_string(), 12_000),
                ("security".to_string(), 8_000),
                ("testing".to_string(), 6_000),
                ("documentation".to_string(), 4_000),
            ]),
            default_burn_rate_per_hour: 12_000,
            interval_percent: 15,
            critical_hours: 4.0,
            high_hours: 8.0,
            medium_hours: 16.0,
            min_observation_secs: 900,
            epoch_length_secs: 86_400,
        }
    }
}

impl ForecastConfig {
    /// Validate forecast values.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_percent >= 100 {
            return Err("interval_percent must be below 100".into());
        }
        if !(self.critical_hours >= 0.0
            && self.critical_hours <= self.high_hours
            && self.high_hours <= self.medium_hours)
        {
            return Err("risk thresholds must satisfy 0 <= critical <= high <= medium".into());
        }
        Ok(())
    }
}

/// Thresholds for bottleneck detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfilerConfig {
    /// A worker active longer than this is reported as slow.
    pub slow_worker_secs: u64,
    /// Ledger consumption percentage that counts as near exhaustion.
    pub near_exhaustion_percent: u8,
    /// Serialized queue size above which the backlog is oversized.
    pub queue_bytes_threshold: usize,
    /// Iterations per micro-benchmark.
    pub benchmark_iterations: u32,
    /// Profiling cycles kept in the bottleneck history ring.
    pub history_depth: usize,
    /// Interval between scheduled profiling runs.
    pub report_interval_secs: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            slow_worker_secs: 1_800,
            near_exhaustion_percent: 90,
            queue_bytes_threshold: 512 * 1024,
            benchmark_iterations: 64,
            history_depth: 32,
            report_interval_secs: 300,
        }
    }
}

impl ProfilerConfig {
    /// Slow-worker threshold in milliseconds.
    #[must_use]
    pub const fn slow_worker_ms(&self) -> u128 {
        self.slow_worker_secs as u128 * 1000
    }

    /// Validate profiler values.
    pub fn validate(&self) -> Result<(), String> {
        if self.near_exhaustion_percent == 0 || self.near_exhaustion_percent > 100 {
            return Err("near_exhaustion_percent must be within 1..=100".into());
        }
        if self.benchmark_iterations == 0 {
            return Err("benchmark_iterations must be greater than 0".into());
        }
        if self.history_depth == 0 {
            return Err("history_depth must be greater than 0".into());
        }
        Ok(())
    }
}
