//! Strata State Management
//!
//! Persists state records for the Strata engine in a versioned snapshot file,
//! with locking so two processes never write the same state.
//!
//! # Overview
//!
//! - **StateFile**: the persisted snapshot (format version, serial, lineage, records)
//! - **StateBackend**: storage for snapshots and locks (currently a local file)
//! - **SnapshotStore**: the engine's `StateStore` over a backend
//! - **LockInfo**: who holds the state lock and until when
//!
//! # Example
//!
//! ```ignore
//! use strata_state::{create_backend, SnapshotStore};
//!
//! let backend = create_backend(&config).await?;
//! let store = SnapshotStore::open(backend).await?;
//!
//! store.lock("apply").await?;
//! // ... execute a plan against `store` ...
//! store.unlock().await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;
pub mod store;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend, default_backend};
pub use lock::LockInfo;
pub use state::StateFile;
pub use store::SnapshotStore;
