//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    let backend: Box<dyn StateBackend> = match config.backend_type.as_str() {
        "local" => Box::new(LocalBackend::from_config(config)?),
        other => return Err(BackendError::unsupported_backend(other)),
    };
    backend.init().await?;
    Ok(backend)
}

/// Backend used when the configuration has no `backend` block
pub async fn default_backend() -> BackendResult<Box<dyn StateBackend>> {
    let backend = LocalBackend::new();
    backend.init().await?;
    Ok(Box::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use strata_core::resource::Value;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig {
            backend_type: "s3".to_string(),
            attributes: HashMap::new(),
        };

        match create_backend(&config).await {
            Err(BackendError::UnsupportedBackend(name)) => assert_eq!(name, "s3"),
            _ => panic!("Expected UnsupportedBackend error"),
        }
    }

    #[tokio::test]
    async fn test_local_backend_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/state.json");
        let config = BackendConfig {
            backend_type: "local".to_string(),
            attributes: HashMap::from([(
                "path".to_string(),
                Value::string(path.to_string_lossy()),
            )]),
        };

        let backend = create_backend(&config).await.unwrap();
        assert!(backend.read_state().await.unwrap().is_none());
        assert!(dir.path().join("deep").is_dir());
    }
}
