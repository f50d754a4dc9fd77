//! Partition registry entries and worker-pool policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::types::Category;

/// A named capacity pool that owns workers and a budget allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Partition name, unique across the registry.
    pub name: String,
    /// Categories this partition can serve.
    pub categories: Vec<Category>,
    /// Maximum concurrently admitted tasks (worker slots).
    pub max_workers: usize,
    /// Base budget allocation.
    pub base_allocation: u64,
    /// Extra allocation held in reserve for the partition's pool.
    #[serde(default)]
    pub pool_reserve: u64,
}

impl PartitionConfig {
    /// Create a partition serving the given categories.
    pub fn new(
        name: impl Into<String>,
        categories: impl IntoIterator<Item = Category>,
        max_workers: usize,
        base_allocation: u64,
    ) -> Self {
        Self {
            name: name.into(),
            categories: categories.into_iter().collect(),
            max_workers,
            base_allocation,
            pool_reserve: 0,
        }
    }

    /// Set the pool reserve.
    #[must_use]
    pub const fn with_pool_reserve(mut self, pool_reserve: u64) -> Self {
        self.pool_reserve = pool_reserve;
        self
    }

    /// Whether this partition serves `category`.
    #[must_use]
    pub fn serves(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Total allocation (base plus reserve).
    #[must_use]
    pub const fn allocation(&self) -> u64 {
        self.base_allocation.saturating_add(self.pool_reserve)
    }

    /// Validate partition values.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("partition name must not be empty".into());
        }
        if self.categories.is_empty() {
            return Err("partition must serve at least one category".into());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".into());
        }
        Ok(())
    }
}

/// Lifecycle policy for warm workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolPolicy {
    /// A warm worker idle longer than this is retired by the sweep.
    pub idle_threshold_secs: u64,
    /// A warm worker that completed this many tasks is retired by the sweep.
    pub max_tasks_per_worker: u64,
    /// Cold-start initialization timeout per attempt.
    pub spawn_timeout_ms: u64,
    /// Cold-start attempts before giving up with a spawn timeout.
    pub spawn_attempts: u32,
    /// Base backoff between cold-start attempts (doubled each retry).
    pub spawn_backoff_ms: u64,
    /// Retired workers older than this are purged from cold storage.
    pub retired_retention_secs: u64,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 600,
            max_tasks_per_worker: 50,
            spawn_timeout_ms: 5_000,
            spawn_attempts: 3,
            spawn_backoff_ms: 100,
            retired_retention_secs: 86_400,
        }
    }
}

impl PoolPolicy {
    /// Idle threshold as milliseconds.
    #[must_use]
    pub const fn idle_threshold_ms(&self) -> u128 {
        self.idle_threshold_secs as u128 * 1000
    }

    /// Retired-worker retention as milliseconds.
    #[must_use]
    pub const fn retired_retention_ms(&self) -> u128 {
        self.retired_retention_secs as u128 * 1000
    }

    /// Cold-start timeout per attempt.
    #[must_use]
    pub const fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_threshold_secs == 0 {
            return Err("idle_threshold_secs must be greater than 0".into());
        }
        if self.max_tasks_per_worker == 0 {
            return Err("max_tasks_per_worker must be greater than 0".into());
        }
        if self.spawn_timeout_ms == 0 {
            return Err("spawn_timeout_ms must be greater than 0".into());
        }
        if self.spawn_attempts == 0 {
            return Err("spawn_attempts must be greater than 0".into());
        }
        Ok(())
    }
}
