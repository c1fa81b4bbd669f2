use thiserror::Error;

/// Which identifier a rollout evaluator needed from the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubjectKind {
    User,
    Tenant,
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectKind::User => f.write_str("user id"),
            SubjectKind::Tenant => f.write_str("tenant id"),
        }
    }
}

/// EvaluationError is returned when a flag could not be evaluated at all.
///
/// [crate::FlagEvaluator] turns repository failures into a disabled [crate::EvaluationResult],
/// so only caller mistakes and cancellation reach its callers.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The flag restricts access by user or tenant but the context did not carry that id.
    #[error("flag {flag_key} requires a {subject} in the evaluation context")]
    MissingSubject {
        flag_key: String,
        subject: SubjectKind,
    },

    /// The caller cancelled the evaluation.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The backing store failed.
    #[error("flag repository error: {0}")]
    Repository(#[source] anyhow::Error),
}

/// CacheError is returned by [crate::DistributedCache] implementations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The connection to the cache is down; the connection supervisor will try to re-establish it.
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache answered, but with an error.
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }
}
