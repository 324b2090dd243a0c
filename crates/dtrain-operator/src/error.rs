//! Error types for the dtrain operator

use thiserror::Error;

/// Errors surfaced by a reconciliation pass.
///
/// A fetch returning NotFound is not an error — it drives the create branch
/// and is modelled as `Ok(None)` at the gateway. Everything here aborts the
/// current pass; the control-loop runtime revisits later.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API failure after the gateway's local retries are exhausted
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Label selector missing or empty. Anti-affinity and endpoint selection
    /// both need at least one label; requires user correction, never retried.
    #[error("invalid label selector for {job}: {reason}")]
    InvalidSelector { job: String, reason: String },

    /// A TrainingJob without a namespace cannot own namespaced children
    #[error("TrainingJob has no namespace")]
    MissingNamespace,

    /// The object has no uid yet, so owner references cannot be built
    #[error("TrainingJob has no uid")]
    MissingUid,
}

impl Error {
    /// Create an invalid-selector error for the named job
    pub fn invalid_selector(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            job: job.into(),
            reason: reason.into(),
        }
    }
}
