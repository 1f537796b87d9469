//! Error taxonomy for the operator (spec §7), shared by the reconcile
//! loop and the status/activity/TTL loops.

#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubernetes optimistic-concurrency conflict: {0}")]
    Conflict(String),

    #[error("malformed resource: {0}")]
    InvalidResource(String),

    #[error("server api error: {0}")]
    ServerApi(String),
}

impl OperatorError {
    /// §7: Kubernetes transient errors (conflict, server-timeout,
    /// service-unavailable) are retried with bounded exponential
    /// backoff; every other kind is permanent for the current cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            OperatorError::Conflict(_) => true,
            OperatorError::Kube(kube::Error::Api(e)) => e.code == 409 || e.code == 503 || e.code == 504,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
