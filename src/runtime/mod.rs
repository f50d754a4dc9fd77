//! Tokio adapters, the maintenance loop and the API surface.

pub mod api;
pub mod maintenance;
pub mod tokio_spawner;

pub use api::{health, submit_task, task_status, Health, TaskStatusResponse, TaskSubmission};
pub use maintenance::{spawn_maintenance, MaintenanceHandle, MaintenanceOptions};
pub use tokio_spawner::TokioSpawner;
