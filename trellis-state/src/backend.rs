//! Where recorded state lives, and how runs take turns writing it

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use trellis_core::resource::Value;

use crate::lock::LockInfo;
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("State is locked: {holder} (lock ID: {lock_id})")]
    Locked { lock_id: String, holder: String },

    #[error("No lock with ID {0}")]
    LockNotFound(String),

    #[error("Lock ID {expected} does not match the held lock {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// The stored state belongs to another stack history
    #[error("State lineage mismatch: stored {expected}, writing {actual}")]
    LineageMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            holder: lock.to_string(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Storage for one stack's [`StateFile`] plus its lock
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// `None` until the first write
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Refuses a state whose lineage differs from the stored one. Callers
    /// bump the serial first.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Fails with [`BackendError::Locked`] while an unexpired lock exists
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Drop a lock left by a run that never released it
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Create whatever storage the backend needs
    async fn init(&self) -> BackendResult<()>;
}

/// Backend kind plus its settings, e.g. `path` for `local`
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub backend_type: String,
    pub attributes: HashMap<String, Value>,
}

impl BackendConfig {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            backend_type: "local".to_string(),
            attributes: HashMap::from([("path".to_string(), Value::String(path.into()))]),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}
