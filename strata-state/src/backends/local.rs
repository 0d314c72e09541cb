//! Local file backend for state storage
//!
//! State lives in a JSON file (default: .strata/state.json). Writes go to a
//! temporary sibling that is synced and then renamed over the old snapshot.
//! A `.lock` file next to the state holds the current `LockInfo`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use strata_core::parser::BlockAttributes;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

/// State kept in a file on the local disk
pub struct LocalBackend {
    /// JSON snapshot
    state_path: PathBuf,
    /// Lock record, next to the snapshot
    lock_path: PathBuf,
}

impl LocalBackend {
    /// Used when the backend block names no path
    pub const DEFAULT_STATE_FILE: &'static str = ".strata/state.json";

    /// Backend at the default path, relative to the working directory
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Backend for a given state file; the lock file takes its stem
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Build from a `backend local { path = "..." }` block
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = match config.attributes.get("path") {
            None => PathBuf::from(Self::DEFAULT_STATE_FILE),
            Some(_) => config
                .get_string("path")
                .map(PathBuf::from)
                .ok_or_else(|| BackendError::configuration("'path' must be a string"))?,
        };
        Ok(Self::with_path(path))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.state_path.with_file_name(name)
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                BackendError::InvalidState(format!("Failed to parse lock file: {}", e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        }
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        };
        StateFile::from_json(&content).map(Some)
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        let content = state.to_json()?;
        let temp = self.temp_path();
        let io = |what: &str, e: std::io::Error| BackendError::Io(format!("{}: {}", what, e));

        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| io("Failed to create temporary state file", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io("Failed to write temporary state file", e))?;
        file.sync_all()
            .await
            .map_err(|e| io("Failed to sync temporary state file", e))?;
        drop(file);

        fs::rename(&temp, &self.state_path)
            .await
            .map_err(|e| io("Failed to replace state file", e))?;
        log::debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(BackendError::locked(existing));
            }
            log::warn!("Taking over expired lock {}", existing);
            self.remove_lock().await?;
        }

        let lock = LockInfo::new(operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        // create_new makes two racing processes see each other
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return match self.read_lock().await? {
                    Some(holder) => Err(BackendError::locked(holder)),
                    None => Err(BackendError::Io("Lock file changed while locking".to_string())),
                };
            }
            Err(e) => return Err(BackendError::Io(format!("Failed to create lock file: {}", e))),
        };
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write lock file: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| BackendError::Io(format!("Failed to sync lock file: {}", e)))?;

        log::debug!("Acquired state lock {} for {}", lock.id, operation);
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        let existing = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock_id.to_string()))?;

        if existing.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }
        log::warn!("Force-unlocking {}", existing);
        self.remove_lock().await
    }

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                BackendError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }
}
