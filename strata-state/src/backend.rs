//! Storage for state snapshots and their lock

use async_trait::async_trait;
use thiserror::Error;

use strata_core::store::StoreError;

use crate::lock::LockInfo;
use crate::state::StateFile;

pub use strata_core::parser::BackendConfig;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("State is locked: {0}")]
    Locked(Box<LockInfo>),

    /// Release or force-unlock of a lock that is not held
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// Written by a newer release
    #[error("State file format version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u64, supported: u32 },

    /// The stored state belongs to a different lineage than the one loaded
    #[error("State lineage changed from {expected} to {actual}; refusing to overwrite it")]
    LineageMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(holder: LockInfo) -> Self {
        Self::Locked(Box::new(holder))
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Lock currently blocking this operation, if that is the failure
    pub fn holder(&self) -> Option<&LockInfo> {
        match self {
            Self::Locked(holder) => Some(&**holder),
            _ => None,
        }
    }
}

impl From<BackendError> for StoreError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Locked(_) => StoreError::Locked(error.to_string()),
            BackendError::InvalidState(_)
            | BackendError::UnsupportedVersion { .. }
            | BackendError::LineageMismatch { .. } => StoreError::Corrupted(error.to_string()),
            other => StoreError::Io(other.to_string()),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Where snapshots and the lock live
///
/// Backends only store what they are given; serials and lineage are managed
/// by `SnapshotStore`.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// `None` before the first write
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Replace the stored snapshot. A reader sees either the previous snapshot
    /// or this one, never a partial write.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Fails with `Locked` while another unexpired lock is held
    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo>;

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Remove a lock by id regardless of who holds it
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>>;

    /// Prepare for first use (e.g., create the state directory)
    async fn init(&self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_shows_the_holder() {
        let lock = LockInfo::new("apply");
        let error = BackendError::locked(lock.clone());

        assert_eq!(error.holder(), Some(&lock));
        assert!(error.to_string().starts_with(&format!("State is locked: {}", lock.id)));
        assert_eq!(BackendError::Io("x".to_string()).holder(), None);
    }

    #[test]
    fn version_and_lineage_errors_display() {
        let error = BackendError::UnsupportedVersion {
            found: 5,
            supported: 2,
        };
        assert_eq!(
            error.to_string(),
            "State file format version 5 is newer than supported version 2"
        );

        let error = BackendError::LineageMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "State lineage changed from a to b; refusing to overwrite it"
        );
    }

    #[test]
    fn store_errors_keep_the_failure_class() {
        assert!(matches!(
            StoreError::from(BackendError::locked(LockInfo::new("apply"))),
            StoreError::Locked(_)
        ));
        assert!(matches!(
            StoreError::from(BackendError::InvalidState("truncated".to_string())),
            StoreError::Corrupted(_)
        ));
        assert!(matches!(
            StoreError::from(BackendError::LineageMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            }),
            StoreError::Corrupted(_)
        ));
        assert!(matches!(
            StoreError::from(BackendError::Io("disk full".to_string())),
            StoreError::Io(_)
        ));
    }
}
