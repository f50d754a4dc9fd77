//! Key-value persistence for task, worker and ledger records.
//!
//! Every record is a whole JSON snapshot under a single key. Backends must make
//! `put` atomic: a reader sees either the previous snapshot or the new one,
//! never a partial write.

pub mod file;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::core::SchedulerError;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Key of the singleton ledger record.
pub const LEDGER_KEY: &str = "ledger";
/// Key prefix of task records.
pub const TASK_PREFIX: &str = "task/";
/// Key prefix of worker records.
pub const WORKER_PREFIX: &str = "worker/";

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("io error on `{key}`: {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// Record could not be encoded or decoded.
    #[error("codec error on `{key}`: {source}")]
    Codec {
        /// Key being accessed.
        key: String,
        /// Source error.
        #[source]
        source: serde_json::Error,
    },
    /// Key contains characters the backend cannot map.
    #[error("invalid key `{0}`")]
    InvalidKey(String),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Abstraction for durable record storage.
pub trait StateStore: Send + Sync {
    /// Fetch the raw record stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Atomically replace the record under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Remove the record under `key`; missing keys are not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// List keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Serialize `value` and store it under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &bytes)
}

/// Load and decode the record under `key`.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })
}

/// Load every record under `prefix`.
pub fn load_all<T: DeserializeOwned>(
    store: &dyn StateStore,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for key in store.keys(prefix)? {
        if let Some(record) = load_json(store, &key)? {
            out.push(record);
        }
    }
    Ok(out)
}

/// Record key for a task.
#[must_use]
pub fn task_key(id: &crate::util::types::TaskId) -> String {
    format!("{TASK_PREFIX}{id}")
}

/// Record key for a worker.
#[must_use]
pub fn worker_key(id: &crate::util::types::WorkerId) -> String {
    format!("{WORKER_PREFIX}{id}")
}
