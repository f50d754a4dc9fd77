//! Configuration models for partitions, pool policy, forecasting and profiling.

pub mod engine;
pub mod pool;
pub mod tuning;

pub use engine::{EngineConfig, SchedulerSettings, CONFIG_PATH_ENV, TOTAL_CAPACITY_ENV};
pub use pool::{PartitionConfig, PoolPolicy};
pub use tuning::{ForecastConfig, PriorityTable, ProfilerConfig};
