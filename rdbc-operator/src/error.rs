//! Error types for the rdbc operator.

use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Optimistic-concurrency conflict on write.
    #[error("Conflict updating {kind}/{name}: object was modified concurrently")]
    Conflict {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Required configuration value is not set.
    #[error("Missing configuration: {0} must be set")]
    MissingConfig(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Secret with the credentials name is controlled by another object.
    #[error("Secret {namespace}/{name} is already controlled by {owner}")]
    ForeignSecret {
        /// Secret name.
        name: String,
        /// Secret namespace.
        namespace: String,
        /// `Kind/name` of the controlling owner.
        owner: String,
    },

    /// Database API call failed.
    #[error("Database API error: {0}")]
    Remote(#[from] rdbc_client::ClientError),

    /// No unused database uid found.
    #[error("Could not allocate database identity: {attempts} candidate uids already in use")]
    IdentityExhausted {
        /// Number of candidates probed.
        attempts: usize,
    },

    /// Remote system reported a uid that differs from the recorded one.
    #[error("Database identity conflict: recorded uid {recorded}, server returned {returned}")]
    IdentityConflict {
        /// Uid recorded on the resource.
        recorded: u32,
        /// Uid returned by the server.
        returned: u32,
    },

    /// Annotation holds a value that cannot be parsed.
    #[error("Invalid annotation {key}: {reason}")]
    InvalidAnnotation {
        /// Annotation key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl OperatorError {
    /// Whether retrying with the same inputs cannot succeed.
    ///
    /// Fatal errors need operator intervention (fixing configuration or the
    /// resource) before another attempt makes sense.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperatorError::MissingConfig(_)
                | OperatorError::InvalidConfig(_)
                | OperatorError::IdentityExhausted { .. }
                | OperatorError::IdentityConflict { .. }
                | OperatorError::InvalidAnnotation { .. }
        )
    }

    /// Whether the reconciliation should be repeated later.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
