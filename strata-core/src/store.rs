//! Store - Contract for persisting state records
//!
//! The executor is the only writer during a run and commits each record as
//! soon as the operation that produced it succeeds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::resource::StateRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State store I/O error: {0}")]
    Io(String),

    #[error("State is locked by {0}")]
    Locked(String),

    #[error("State is corrupted: {0}")]
    Corrupted(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent map of logical name to state record
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Consistent snapshot of every record
    async fn load(&self) -> StoreResult<BTreeMap<String, StateRecord>>;

    /// Insert or replace a record. When this returns Ok the change is durable.
    async fn commit(&self, name: &str, record: StateRecord) -> StoreResult<()>;

    /// Remove a record, returning it if it existed
    async fn remove(&self, name: &str) -> StoreResult<Option<StateRecord>>;
}

/// In-memory store for plan-only runs and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<String, StateRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> StoreResult<BTreeMap<String, StateRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn commit(&self, name: &str, record: StateRecord) -> StoreResult<()> {
        self.records.write().await.insert(name.to_string(), record);
        Ok(())
    }

    async fn remove(&self, name: &str) -> StoreResult<Option<StateRecord>> {
        Ok(self.records.write().await.remove(name))
    }
}
