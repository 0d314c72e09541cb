//! Strata Sandbox Provider
//!
//! A simulated cloud for exercising the engine without real infrastructure.
//! It generates identifiers and ARNs, rejects duplicate identities and
//! dangling references, and can inject latency and throttling errors.
//! Objects live in memory or in a JSON file that survives between runs.

pub mod cloud;
pub mod schemas;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use strata_core::parser::{BlockAttributes, ProviderConfig};
use strata_core::provider::{
    AttributeDiff, BoxFuture, Created, Provider, ProviderError, ProviderResult,
};
use strata_core::resource::{Attributes, ResourceId};
use strata_core::schema::ResourceSchema;
use tokio::sync::Mutex;

use crate::cloud::{Account, Cloud};
use crate::schemas::Kind;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Invalid sandbox provider configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to access sandbox state {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Sandbox state {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Settings from the `provider sandbox { ... }` block
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    pub region: String,
    pub account_id: String,
    /// Added before every call
    pub latency: Duration,
    /// Each mutating operation on each resource fails this many times before succeeding
    pub transient_failures: u32,
    /// Persist objects here; memory only when unset
    pub state_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            region: "sbx-east-1".to_string(),
            account_id: "123456789012".to_string(),
            latency: Duration::ZERO,
            transient_failures: 0,
            state_path: None,
        }
    }
}

impl SandboxConfig {
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, SandboxError> {
        let mut result = Self::default();

        for (key, value) in &config.attributes {
            let invalid = |expected: &str| {
                SandboxError::InvalidConfig(format!("'{}' must be {}, got {}", key, expected, value))
            };
            match key.as_str() {
                "region" => {
                    let region = config.get_string(key).ok_or_else(|| invalid("a string"))?;
                    if !schemas::types::VALID_REGIONS.contains(&region) {
                        return Err(SandboxError::InvalidConfig(format!(
                            "unknown region '{}', expected one of: {}",
                            region,
                            schemas::types::VALID_REGIONS.join(", ")
                        )));
                    }
                    result.region = region.to_string();
                }
                "account_id" => {
                    let account = config.get_string(key).ok_or_else(|| invalid("a string"))?;
                    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                        return Err(invalid("12 digits"));
                    }
                    result.account_id = account.to_string();
                }
                "latency_ms" => {
                    let ms = config
                        .get_int(key)
                        .and_then(|n| u64::try_from(n).ok())
                        .ok_or_else(|| invalid("a non-negative integer"))?;
                    result.latency = Duration::from_millis(ms);
                }
                "transient_failures" => {
                    result.transient_failures = config
                        .get_int(key)
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| invalid("a non-negative integer"))?;
                }
                "state_path" => {
                    let path = config.get_string(key).ok_or_else(|| invalid("a string"))?;
                    result.state_path = Some(PathBuf::from(path));
                }
                other => {
                    return Err(SandboxError::InvalidConfig(format!(
                        "unknown attribute '{}'",
                        other
                    )));
                }
            }
        }
        Ok(result)
    }

    fn account(&self) -> Account {
        Account {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
        }
    }
}

pub struct SandboxProvider {
    config: SandboxConfig,
    schemas: HashMap<String, ResourceSchema>,
    cloud: Mutex<Cloud>,
    /// Calls seen per "operation resource" key, for failure injection
    calls: StdMutex<HashMap<String, u32>>,
}

impl SandboxProvider {
    /// In-memory sandbox, ignoring `state_path`
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_cloud(config, Cloud::default())
    }

    /// Sandbox backed by `config.state_path`, loading whatever it already holds
    pub async fn open(config: SandboxConfig) -> Result<Self, SandboxError> {
        let cloud = match &config.state_path {
            Some(path) => load_cloud(path).await?,
            None => Cloud::default(),
        };
        Ok(Self::with_cloud(config, cloud))
    }

    fn with_cloud(config: SandboxConfig, cloud: Cloud) -> Self {
        let schemas = schemas::all_schemas()
            .into_iter()
            .map(|s| (s.resource_type.clone(), s))
            .collect();
        Self {
            config,
            schemas,
            cloud: Mutex::new(cloud),
            calls: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Copy of every live object
    pub async fn snapshot(&self) -> Cloud {
        self.cloud.lock().await.clone()
    }

    fn lookup(&self, id: &ResourceId) -> ProviderResult<(&'static Kind, &ResourceSchema)> {
        let unknown = || {
            ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        };
        let kind = schemas::kind(&id.resource_type).ok_or_else(unknown)?;
        let schema = self.schemas.get(&id.resource_type).ok_or_else(unknown)?;
        Ok((kind, schema))
    }

    /// Fail the first `transient_failures` calls of `operation` on `id`
    fn inject_failure(&self, operation: &str, id: &ResourceId) -> ProviderResult<()> {
        if self.config.transient_failures == 0 {
            return Ok(());
        }
        let mut calls = match self.calls.lock() {
            Ok(calls) => calls,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seen = calls.entry(format!("{} {}", operation, id)).or_insert(0);
        *seen += 1;
        if *seen <= self.config.transient_failures {
            log::debug!("sandbox: throttling {} {} (call {})", operation, id, seen);
            return Err(ProviderError::transient(
                "Throttling: rate exceeded, please retry",
            )
            .for_resource(id.clone()));
        }
        Ok(())
    }

    /// Run a mutation against the cloud, persisting the result.
    ///
    /// If the new snapshot cannot be saved the mutation is rolled back.
    async fn mutate<T>(
        &self,
        operation: &str,
        id: &ResourceId,
        change: impl FnOnce(&mut Cloud) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        self.pause().await;
        self.inject_failure(operation, id)?;

        let mut cloud = self.cloud.lock().await;
        let before = cloud.clone();
        let result = change(&mut *cloud)?;

        if let Some(path) = &self.config.state_path
            && let Err(e) = save_cloud(path, &*cloud).await
        {
            *cloud = before;
            return Err(ProviderError::transient(format!(
                "failed to persist sandbox state after {}",
                operation
            ))
            .for_resource(id.clone())
            .with_cause(e));
        }
        Ok(result)
    }

    async fn pause(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }
}

impl Provider for SandboxProvider {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        schemas::all_schemas()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: &str,
    ) -> BoxFuture<'_, ProviderResult<Option<Attributes>>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            self.pause().await;
            self.lookup(&id)?;
            Ok(self.cloud.lock().await.read(&id, &identifier))
        })
    }

    fn create(&self, id: &ResourceId, inputs: &Attributes) -> BoxFuture<'_, ProviderResult<Created>> {
        let id = id.clone();
        let inputs = inputs.clone();
        Box::pin(async move {
            let (kind, schema) = self.lookup(&id)?;
            let account = self.config.account();
            self.mutate("create", &id, |cloud| {
                cloud.create(kind, schema, &account, &id, &inputs)
            })
            .await
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        diff: &AttributeDiff,
    ) -> BoxFuture<'_, ProviderResult<Attributes>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let diff = diff.clone();
        Box::pin(async move {
            let (kind, schema) = self.lookup(&id)?;
            self.mutate("update", &id, |cloud| {
                cloud.update(kind, schema, &id, &identifier, &diff)
            })
            .await
        })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            self.lookup(&id)?;
            self.mutate("delete", &id, |cloud| cloud.delete(&id, &identifier))
                .await
        })
    }
}

async fn load_cloud(path: &Path) -> Result<Cloud, SandboxError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|source| SandboxError::Corrupted {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cloud::default()),
        Err(source) => Err(SandboxError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn save_cloud(path: &Path, cloud: &Cloud) -> Result<(), SandboxError> {
    let io = |source| SandboxError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = serde_json::to_string_pretty(cloud).map_err(|source| SandboxError::Corrupted {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, content).await.map_err(io)?;
    tokio::fs::rename(&temp, path).await.map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::provider::{ErrorClass, ErrorKind};
    use strata_core::resource::Value;

    fn vpc_inputs(cidr: &str) -> Attributes {
        [("cidr_block".to_string(), Value::string(cidr))].into()
    }

    fn provider_config(attrs: &[(&str, Value)]) -> ProviderConfig {
        ProviderConfig {
            name: "sandbox".to_string(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn config_from_provider_block() {
        let config = SandboxConfig::from_provider_config(&provider_config(&[
            ("region", Value::string("sbx-west-1")),
            ("latency_ms", Value::Int(25)),
            ("transient_failures", Value::Int(2)),
            ("state_path", Value::string(".strata/sandbox.json")),
        ]))
        .unwrap();

        assert_eq!(config.region, "sbx-west-1");
        assert_eq!(config.latency, Duration::from_millis(25));
        assert_eq!(config.transient_failures, 2);
        assert_eq!(config.state_path, Some(PathBuf::from(".strata/sandbox.json")));
        assert_eq!(config.account_id, "123456789012");
    }

    #[test]
    fn config_rejects_bad_values() {
        for attrs in [
            vec![("region", Value::string("us-east-1"))],
            vec![("latency_ms", Value::Int(-1))],
            vec![("account_id", Value::string("42"))],
            vec![("transient_failures", Value::string("two"))],
            vec![("colour", Value::string("blue"))],
        ] {
            assert!(matches!(
                SandboxConfig::from_provider_config(&provider_config(&attrs)),
                Err(SandboxError::InvalidConfig(_))
            ));
        }
    }

    #[tokio::test]
    async fn create_read_delete() {
        let provider = SandboxProvider::new(SandboxConfig::default());
        let id = ResourceId::new("sandbox.vpc", "main");

        let created = provider.create(&id, &vpc_inputs("10.0.0.0/16")).await.unwrap();
        let read = provider.read(&id, &created.identifier).await.unwrap();
        assert_eq!(read, Some(created.outputs.clone()));

        provider.delete(&id, &created.identifier).await.unwrap();
        assert_eq!(provider.read(&id, &created.identifier).await.unwrap(), None);
        let err = provider.delete(&id, &created.identifier).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_per_operation() {
        let provider = SandboxProvider::new(SandboxConfig {
            transient_failures: 2,
            ..SandboxConfig::default()
        });
        let id = ResourceId::new("sandbox.vpc", "main");

        for _ in 0..2 {
            let err = provider.create(&id, &vpc_inputs("10.0.0.0/16")).await.unwrap_err();
            assert_eq!(provider.classify(&err), ErrorClass::Transient);
        }
        let created = provider.create(&id, &vpc_inputs("10.0.0.0/16")).await.unwrap();
        assert!(provider.snapshot().await.get(&created.identifier).is_some());

        // Reads are never throttled; deletes count separately
        assert!(provider.read(&id, &created.identifier).await.unwrap().is_some());
        assert!(provider.delete(&id, &created.identifier).await.is_err());
    }

    #[tokio::test]
    async fn unknown_resource_type_is_permanent() {
        let provider = SandboxProvider::new(SandboxConfig::default());
        let err = provider
            .create(&ResourceId::new("sandbox.bucket", "b"), &Attributes::new())
            .await
            .unwrap_err();
        assert_eq!(provider.classify(&err), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn objects_persist_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            state_path: Some(dir.path().join("cloud/sandbox.json")),
            ..SandboxConfig::default()
        };
        let id = ResourceId::new("sandbox.vpc", "main");

        let first = SandboxProvider::open(config.clone()).await.unwrap();
        let created = first.create(&id, &vpc_inputs("10.0.0.0/16")).await.unwrap();

        let second = SandboxProvider::open(config).await.unwrap();
        assert_eq!(
            second.read(&id, &created.identifier).await.unwrap(),
            Some(created.outputs)
        );
        assert_eq!(second.snapshot().await, first.snapshot().await);
    }

    #[tokio::test]
    async fn corrupted_state_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let result = SandboxProvider::open(SandboxConfig {
            state_path: Some(path),
            ..SandboxConfig::default()
        })
        .await;
        assert!(matches!(result, Err(SandboxError::Corrupted { .. })));
    }
}
