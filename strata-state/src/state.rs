//! State file structures for persisting infrastructure state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_core::resource::StateRecord;

use crate::backend::{BackendError, BackendResult};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Strata that last modified this state
    pub strata_version: String,
    /// All managed resources by logical name
    #[serde(default)]
    pub resources: BTreeMap<String, StateRecord>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 2;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage (for initialization)
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            strata_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: BTreeMap::new(),
        }
    }

    /// Increment serial and update strata version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.strata_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Parse a state file of any supported version, migrating older formats forward
    pub fn from_json(content: &str) -> BackendResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| BackendError::InvalidState(format!("Failed to parse state file: {}", e)))?;

        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| BackendError::InvalidState("missing format version".to_string()))?;

        match version {
            1 => {
                let v1: StateFileV1 = serde_json::from_value(raw).map_err(|e| {
                    BackendError::InvalidState(format!("Failed to parse version 1 state: {}", e))
                })?;
                log::info!(
                    "Migrating state file from format version 1 to {}",
                    Self::CURRENT_VERSION
                );
                v1.migrate()
            }
            v if v == u64::from(Self::CURRENT_VERSION) => serde_json::from_value(raw)
                .map_err(|e| BackendError::InvalidState(format!("Failed to parse state file: {}", e))),
            v => Err(BackendError::UnsupportedVersion {
                found: v,
                supported: Self::CURRENT_VERSION,
            }),
        }
    }

    pub fn to_json(&self) -> BackendResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize state: {}", e)))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Format version 1: resources as a list, each carrying its own name
#[derive(Debug, Deserialize)]
struct StateFileV1 {
    serial: u64,
    lineage: String,
    strata_version: String,
    #[serde(default)]
    resources: Vec<ResourceStateV1>,
}

#[derive(Debug, Deserialize)]
struct ResourceStateV1 {
    name: String,
    resource_type: String,
    identifier: String,
    /// Last-applied inputs
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    protected: bool,
}

impl StateFileV1 {
    fn migrate(self) -> BackendResult<StateFile> {
        let mut resources = BTreeMap::new();
        for old in self.resources {
            if resources.contains_key(&old.name) {
                return Err(BackendError::InvalidState(format!(
                    "resource '{}' appears twice in version 1 state",
                    old.name
                )));
            }
            // Version 1 kept no outputs apart from the identifier
            let mut record = StateRecord::new(old.resource_type, old.identifier.clone());
            record
                .outputs
                .insert("id".to_string(), serde_json::Value::String(old.identifier));
            record.inputs = old.attributes;
            record.dependencies = old.dependencies;
            record.protected = old.protected;
            resources.insert(old.name, record);
        }

        Ok(StateFile {
            version: StateFile::CURRENT_VERSION,
            serial: self.serial,
            lineage: self.lineage,
            strata_version: self.strata_version,
            resources,
        })
    }
}
