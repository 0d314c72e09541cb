//! State lock records
//!
//! A lock names the command and process holding it. Locks carry an expiry so
//! that a crashed run does not block the state forever; an expired lock may be
//! taken over by the next writer.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a lock stays valid without being released
pub const LOCK_TTL: Duration = Duration::minutes(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock ("apply", "destroy", "plan")
    pub operation: String,
    /// user@host
    pub who: String,
    /// Process id of the holder; 0 in locks written without one
    #[serde(default)]
    pub pid: u32,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self::with_ttl(operation, LOCK_TTL)
    }

    pub fn with_ttl(operation: impl Into<String>, ttl: Duration) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            pid: std::process::id(),
            created,
            expires: created + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }

    /// Whether this lock was taken by the current process
    pub fn is_own(&self) -> bool {
        self.pid == std::process::id() && self.who == lock_owner()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} held by {}", self.id, self.who)?;
        if self.pid != 0 {
            write!(f, " (pid {})", self.pid)?;
        }
        write!(
            f,
            " for '{}' since {}",
            self.operation,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        if self.is_expired() {
            write!(f, " (expired)")?;
        }
        Ok(())
    }
}

fn lock_owner() -> String {
    let user = ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host)
}
