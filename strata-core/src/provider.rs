//! Provider - Trait abstracting resource operations
//!
//! A Provider implements create/read/update/delete for the resource types it
//! advertises, plus the capability queries the differ and executor rely on:
//! per-type schemas and error classification.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::resource::{Attributes, ResourceId, StateRecord, encode_attributes};
use crate::schema::{Capabilities, ResourceSchema};

/// What kind of failure a provider reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Throttling, timeouts, eventual-consistency races
    Transient,
    /// Invalid input, conflicts, authorization; retrying will not help
    Permanent,
    /// The object does not exist
    NotFound,
}

/// Retry decision for a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub kind: ErrorKind,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    /// A permanent error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            kind: ErrorKind::Permanent,
            cause: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            ..Self::new(message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            ..Self::new(message)
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Provider-assigned identifier (e.g., vpc-1a2b3c)
    pub identifier: String,
    /// Computed attributes
    pub outputs: Attributes,
}

/// Inputs of an in-place update
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    /// Inputs as last applied
    pub old: Attributes,
    /// Desired inputs, fully resolved
    pub new: Attributes,
}

impl AttributeDiff {
    pub fn new(old: Attributes, new: Attributes) -> Self {
        Self { old, new }
    }

    /// Names of attributes that differ, including removed ones
    pub fn changed(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .new
            .iter()
            .filter(|(k, v)| self.old.get(*k) != Some(*v))
            .map(|(k, _)| k.as_str())
            .collect();
        names.extend(
            self.old
                .keys()
                .filter(|k| !self.new.contains_key(*k))
                .map(String::as_str),
        );
        names.sort_unstable();
        names
    }
}

/// Main Provider trait
///
/// Each provider implements this for the resource types it advertises.
/// All operations are async and involve side effects. Inputs passed to
/// `create` and `update` contain no unresolved references.
pub trait Provider: Send + Sync {
    /// Name of this Provider; also the prefix of its resource types (e.g., "sandbox")
    fn name(&self) -> &'static str;

    /// Schemas of every resource type this Provider handles
    fn schemas(&self) -> Vec<ResourceSchema>;

    /// Get the attributes of a live object. Returns `None` if it does not exist.
    fn read(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> BoxFuture<'_, ProviderResult<Option<Attributes>>>;

    /// Create a resource
    fn create(&self, id: &ResourceId, inputs: &Attributes) -> BoxFuture<'_, ProviderResult<Created>>;

    /// Update a resource in place, returning its new outputs
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        diff: &AttributeDiff,
    ) -> BoxFuture<'_, ProviderResult<Attributes>>;

    /// Delete a resource
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;

    /// Decide whether an error is worth retrying
    fn classify(&self, error: &ProviderError) -> ErrorClass {
        match error.kind {
            ErrorKind::Transient => ErrorClass::Transient,
            ErrorKind::Permanent | ErrorKind::NotFound => ErrorClass::Permanent,
        }
    }
}

/// Routes resource types to providers by their `<provider>.` prefix
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    schemas: HashMap<String, ResourceSchema>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        for schema in provider.schemas() {
            self.schemas.insert(schema.resource_type.clone(), schema);
        }
        log::debug!("Registered provider '{}'", provider.name());
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    /// Provider responsible for a resource type
    pub fn provider_for(&self, resource_type: &str) -> Option<Arc<dyn Provider>> {
        let prefix = resource_type
            .split_once('.')
            .map_or(resource_type, |(p, _)| p);
        self.providers.get(prefix).cloned()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Capabilities for ProviderRegistry {
    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

/// Changes found by [`refresh`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Records whose outputs drifted
    pub updated: Vec<String>,
    /// Records whose object no longer exists
    pub vanished: Vec<String>,
}

/// Read every recorded object back from its provider.
///
/// Vanished objects are dropped from `records` so the next plan re-creates
/// them; outputs of the rest are replaced with what the provider reports.
/// A vanished object with deposed copies keeps its record, marked vanished,
/// until those copies are deleted.
pub async fn refresh(
    registry: &ProviderRegistry,
    records: &mut BTreeMap<String, StateRecord>,
) -> ProviderResult<RefreshReport> {
    let mut report = RefreshReport::default();

    for (name, record) in records.iter_mut() {
        if !record.is_live() {
            continue;
        }
        let id = ResourceId::new(record.resource_type.clone(), name.clone());
        let provider = registry.provider_for(&record.resource_type).ok_or_else(|| {
            ProviderError::new(format!(
                "No provider registered for '{}'",
                record.resource_type
            ))
            .for_resource(id.clone())
        })?;

        match provider.read(&id, &record.identifier).await? {
            None => {
                log::info!("{} ({}) no longer exists", id, record.identifier);
                report.vanished.push(name.clone());
                if !record.deposed.is_empty() {
                    record.vanished = true;
                    record.outputs.clear();
                }
            }
            Some(outputs) => {
                let outputs = encode_attributes(&outputs);
                if outputs != record.outputs {
                    log::info!("{} outputs changed outside of strata", id);
                    record.outputs = outputs;
                    report.updated.push(name.clone());
                }
            }
        }
    }

    records.retain(|name, record| !record.is_live() || !report.vanished.contains(name));
    Ok(report)
}
