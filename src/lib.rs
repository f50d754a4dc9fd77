//! # Prometheus Budget Scheduler
//!
//! A budget-aware task scheduler for fleets of AI agent workers.
//!
//! Tasks carry an estimated cost in abstract resource units (tokens). The
//! scheduler only admits a task when the partition that will run it can
//! reserve that cost, hands admitted tasks to pooled workers, and settles the
//! reservation against the actual cost once an executor reports back.
//!
//! ## Core Problem Solved
//!
//! Agent workloads spend a finite budget and pay a high price for cold starts:
//!
//! - **Finite Budget**: every task consumes tokens from a fixed epoch allocation
//! - **Partitioned Ownership**: each partition ("master") owns a slice of the budget
//!   and a cap on concurrent workers
//! - **Expensive Cold Starts**: worker initialization (model load, session setup)
//!   is slow, so idle workers are kept warm and reused
//! - **Runway Awareness**: operators need to know when the budget will run out
//!   before it does
//!
//! ## Key Features
//!
//! - **Priority Scheduling**: scores from category, urgency and dependency count,
//!   oldest first on ties
//! - **Reservation Ledger**: reserve, commit or release, with atomic reallocation
//!   between partitions and burn-rate forecasting
//! - **Warm Worker Pool**: reuse before spawn, bounded cold starts with retry,
//!   idle and task-count retirement
//! - **Load Balancing**: least-loaded partition among those serving a category
//! - **Profiling**: latency benchmarks, bottleneck detection and ranked
//!   recommendations with optional low-risk auto-tuning
//! - **Durable State**: task, worker and ledger records survive restarts through a
//!   pluggable [`infra::StateStore`]
//!
//! ## Engine
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_budget_scheduler::builders::EngineBuilder;
//! use prometheus_budget_scheduler::config::EngineConfig;
//! use prometheus_budget_scheduler::core::TaskRequest;
//! use prometheus_budget_scheduler::infra::FileStore;
//! use prometheus_budget_scheduler::runtime::{spawn_maintenance, MaintenanceOptions, TokioSpawner};
//! use prometheus_budget_scheduler::util::{now_ms, Urgency};
//!
//! let engine = Arc::new(
//!     EngineBuilder::new(EngineConfig::from_env()?)
//!         .with_store(Arc::new(FileStore::open("./state")?))
//!         .build(now_ms())?,
//! );
//! engine.submit(TaskRequest::new("security", Urgency::High, 12_000), now_ms())?;
//!
//! let spawner = TokioSpawner::try_current().expect("inside a tokio runtime");
//! let loop_handle = spawn_maintenance(engine.clone(), MyExecutor, spawner, MaintenanceOptions::default());
//! // ...
//! loop_handle.shutdown().await;
//! ```
//!
//! For complete examples, see:
//! - `tests/scheduler_flow_test.rs` - End-to-end scheduling through the engine
//! - `tests/unit/` - Per-component behaviour

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and budget accounting.
pub mod core;
/// Configuration models for partitions, pool policy, forecasting and profiling.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Infrastructure adapters for the pending queue and the state store.
pub mod infra;
/// Tokio adapters, the maintenance loop and the API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
