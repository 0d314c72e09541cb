//! `StateStore` over a state backend
//!
//! Every commit rewrites the whole snapshot with a bumped serial. Writes are
//! serialized behind one async mutex, and an in-memory copy is only changed
//! once the backend has accepted the new snapshot.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use strata_core::resource::StateRecord;
use strata_core::store::{StateStore, StoreResult};

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct SnapshotStore {
    backend: Box<dyn StateBackend>,
    state: Mutex<StateFile>,
    lock: Mutex<Option<LockInfo>>,
}

impl SnapshotStore {
    /// Load the stored snapshot, or start a new lineage if there is none
    pub async fn open(backend: Box<dyn StateBackend>) -> BackendResult<Self> {
        let state = match backend.read_state().await? {
            Some(state) => {
                log::debug!(
                    "Loaded state serial {} ({} resources)",
                    state.serial,
                    state.resources.len()
                );
                state
            }
            None => {
                log::debug!("No existing state; starting a new lineage");
                StateFile::new()
            }
        };

        Ok(Self {
            backend,
            state: Mutex::new(state),
            lock: Mutex::new(None),
        })
    }

    pub fn backend(&self) -> &dyn StateBackend {
        self.backend.as_ref()
    }

    /// Copy of the current snapshot, including serial and lineage
    pub async fn snapshot(&self) -> StateFile {
        self.state.lock().await.clone()
    }

    /// Take the backend lock for `operation`; it is held until `unlock`
    pub async fn lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = self.backend.acquire_lock(operation).await?;
        *self.lock.lock().await = Some(lock.clone());

        // Another writer may have finished between open and lock
        if let Err(e) = self.reload().await {
            *self.lock.lock().await = None;
            self.backend.release_lock(&lock).await?;
            return Err(e);
        }
        Ok(lock)
    }

    /// Adopt the stored snapshot, unless it belongs to another lineage
    async fn reload(&self) -> BackendResult<()> {
        let Some(latest) = self.backend.read_state().await? else {
            return Ok(());
        };
        let mut state = self.state.lock().await;
        if state.serial > 0 && latest.lineage != state.lineage {
            return Err(BackendError::LineageMismatch {
                expected: state.lineage.clone(),
                actual: latest.lineage,
            });
        }
        *state = latest;
        Ok(())
    }

    /// Release the lock taken by `lock`, if any
    pub async fn unlock(&self) -> BackendResult<()> {
        if let Some(lock) = self.lock.lock().await.take() {
            self.backend.release_lock(&lock).await?;
            log::debug!("Released state lock {}", lock.id);
        }
        Ok(())
    }

    /// Apply `change` to a copy of the snapshot and persist it
    async fn write_with(&self, change: impl FnOnce(&mut StateFile)) -> BackendResult<StateFile> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next);
        next.increment_serial();
        self.backend.write_state(&next).await?;
        *state = next.clone();
        Ok(next)
    }

    /// Replace every record at once (used after a refresh)
    pub async fn replace_records(
        &self,
        records: BTreeMap<String, StateRecord>,
    ) -> BackendResult<()> {
        self.write_with(|state| state.resources = records).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SnapshotStore {
    async fn load(&self) -> StoreResult<BTreeMap<String, StateRecord>> {
        Ok(self.state.lock().await.resources.clone())
    }

    async fn commit(&self, name: &str, record: StateRecord) -> StoreResult<()> {
        let state = self
            .write_with(|state| {
                state.resources.insert(name.to_string(), record);
            })
            .await?;
        log::debug!("Committed {} at serial {}", name, state.serial);
        Ok(())
    }

    async fn remove(&self, name: &str) -> StoreResult<Option<StateRecord>> {
        let mut removed = None;
        let state = self
            .write_with(|state| removed = state.resources.remove(name))
            .await?;
        log::debug!("Removed {} at serial {}", name, state.serial);
        Ok(removed)
    }
}
