//! Error types for the Memcached Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for the operator
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Create rejected because the object already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Write rejected because the version token was stale
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    /// An object not owned by this database sits at the expected name
    #[error("intended {kind} \"{name}\" already exists and is not owned by this database")]
    OwnershipError { kind: String, name: String },

    /// Spec rejected by validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Inconsistent configuration, e.g. halting without a Halt policy
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A dormant record of another kind holds this identity
    #[error("DormantDatabase {0} archives a different kind of database")]
    DormantKindMismatch(String),

    /// The new declaration differs from the archived dormant spec
    #[error("spec of {0} mismatches archived dormant spec")]
    DormantSpecMismatch(String),

    /// Phase change that would break phase monotonicity
    #[error("invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::crd::DatabasePhase,
        to: crate::crd::DatabasePhase,
    },

    /// The workload did not disappear within the pause timeout
    #[error("timed out waiting for {0} to be paused")]
    PauseTimeout(String),

    /// Monitoring collaborator failure
    #[error("Monitoring error: {0}")]
    MonitoringError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Missing object key
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => {
                // 4xx other than 409 Conflict and 429 TooManyRequests are not retryable
                if (400..500).contains(&resp.code) {
                    return resp.code == 409 || resp.code == 429;
                }
                true
            }
            Error::KubeError(_) => true,
            Error::AlreadyExists { .. } | Error::Conflict { .. } => true,
            // The foreign object may be removed later
            Error::OwnershipError { .. } => true,
            Error::PauseTimeout(_) => true,
            Error::MonitoringError(_) => true,
            Error::FinalizerError(_) => true,
            Error::ValidationError(_)
            | Error::ConfigError(_)
            | Error::DormantKindMismatch(_)
            | Error::DormantSpecMismatch(_)
            | Error::InvalidTransition { .. }
            | Error::SerializationError(_)
            | Error::MissingObjectKey(_) => false,
        }
    }

    /// Whether this error is a user error that must not be retried
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }
}
