use core::error::Error;

/// How the controller reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ErrorClass {
    /// The object vanished. Dropped silently.
    NotFound,
    /// Stale version on write. Retried immediately without backoff growth.
    Conflict,
    /// API or network unavailable. Retried with exponential backoff.
    Transient,
    /// Malformed object. Rechecked at a slow fixed interval.
    Permanent,
}

/// Errors surfaced by the cluster observer and mutator.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ClusterError {
    #[display("Object not found: {key}")]
    NotFound { key: String },
    #[display("Version conflict while writing {key}")]
    Conflict { key: String },
    #[display("Cluster API unavailable: {message}")]
    Transient { message: String },
    #[display("Cluster API rejected the request: {message}")]
    Permanent { message: String },
}

impl ClusterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClusterError::NotFound { .. } => ErrorClass::NotFound,
            ClusterError::Conflict { .. } => ErrorClass::Conflict,
            ClusterError::Transient { .. } => ErrorClass::Transient,
            ClusterError::Permanent { .. } => ErrorClass::Permanent,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ClusterError::Transient {
            message: message.into(),
        }
    }
}

impl Error for ClusterError {}
