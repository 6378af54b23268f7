//! Advisory lock taken by `up` and `destroy` so two runs never interleave
//! writes to one state file

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds a lock is honored before another run may take it over
pub const LOCK_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock, `up` or `destroy`
    pub operation: String,
    /// `user@host` of the holder
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_timeout(operation, LOCK_TTL_SECS)
    }

    pub fn with_timeout(operation: impl Into<String>, ttl_secs: i64) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: holder(),
            created,
            expires: created + Duration::seconds(ttl_secs),
        }
    }

    /// A stale lock is left behind by a run that died; it no longer blocks
    pub fn is_expired(&self) -> bool {
        self.expires < Utc::now()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} since {}",
            self.operation,
            self.who,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn holder() -> String {
    let user = ["USER", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok())
        .unwrap_or_else(|| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host)
}
