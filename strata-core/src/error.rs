//! Errors raised before any provider call is made

use thiserror::Error;

use crate::parser::ParseError;
use crate::schema::TypeError;

/// A dependency cycle between declared resources
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Dependency cycle detected: {}", path.join(" -> "))]
pub struct CycleError {
    /// Logical names along the cycle; the first name is repeated at the end
    pub path: Vec<String>,
}

/// Fatal configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Duplicate resource name '{0}'")]
    DuplicateName(String),

    #[error("Resource '{resource}' references undeclared resource '{target}'")]
    DanglingReference { resource: String, target: String },

    #[error("Resource '{resource}' references '{target}.{attribute}', which '{target}' does not have")]
    UnknownAttributeReference {
        resource: String,
        target: String,
        attribute: String,
    },

    #[error("Unknown resource type '{0}'")]
    UnknownResourceType(String),

    #[error("{resource}: {error}")]
    InvalidAttribute { resource: String, error: TypeError },

    #[error("Resource '{0}' has lifecycle.prevent_destroy set but the plan would destroy it")]
    PreventDestroy(String),
}

impl ConfigError {
    /// Attach a schema error to the resource it was found on
    pub fn invalid(resource: impl Into<String>, error: TypeError) -> Self {
        Self::InvalidAttribute {
            resource: resource.into(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_display_lists_path() {
        let error = CycleError {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(error.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn dangling_reference_display() {
        let error = ConfigError::DanglingReference {
            resource: "svc".into(),
            target: "net".into(),
        };
        assert_eq!(
            error.to_string(),
            "Resource 'svc' references undeclared resource 'net'"
        );
    }
}
