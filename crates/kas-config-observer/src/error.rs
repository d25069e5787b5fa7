//! Error types for the config observers

use thiserror::Error;

/// Errors that can occur while observing cluster state
#[derive(Error, Debug)]
pub enum ObserveError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// A state lookup failed for a reason other than not-found
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// The upstream resource violates an invariant admission should have enforced
    #[error("Invalid resource: {0}")]
    SchemaViolation(String),

    /// A single field failed validation
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// A mirror source was named explicitly but does not exist
    #[error("Source configmap {namespace}/{name} not found")]
    SourceNotFound { namespace: String, name: String },

    /// The comparison key exists in neither configmap
    #[error("key '{key}' not found in either configmap")]
    ComparisonKeyMissing { key: String },

    /// Mirror request rejected by the resource syncer
    #[error("Resource sync failed: {0}")]
    Sync(String),

    /// A node in the path tree has an unexpected shape
    #[error("Value at {path} is not a {expected}")]
    PathTypeMismatch { path: String, expected: &'static str },

    /// Two observers claim the same path
    #[error("Path {path} is claimed by both {first} and {second}")]
    PathOwnershipConflict {
        path: String,
        first: String,
        second: String,
    },

    /// The feature gate accessor could not produce a gate set
    #[error("Feature gates unavailable: {0}")]
    FeatureGates(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for observer operations
pub type Result<T> = std::result::Result<T, ObserveError>;

impl ObserveError {
    /// Build a field validation error
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ObserveError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObserveError::NotFound { .. })
    }

    /// Check if this error is retryable by the outer reconciliation loop
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ObserveError::KubeError(_)
                | ObserveError::Lookup(_)
                | ObserveError::Sync(_)
                | ObserveError::FeatureGates(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        if self.is_retryable() {
            Some(std::time::Duration::from_secs(30))
        } else {
            None
        }
    }
}
