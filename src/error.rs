use std::sync::Arc;

use crate::entity::{EntityKey, NameMatch};

/// Errors raised by a `SourceFetcher`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("source has no record")]
    NotFound,

    #[error("source unavailable: {0}")]
    Transient(String),
}

/// Errors raised by an `EntityStore`
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("entity {0} is not stored")]
    Missing(EntityKey),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatcherError {
    #[error("thresholds must lie in 0..=100 (lookup {lookup}, identity {identity})")]
    OutOfRange { lookup: f64, identity: f64 },

    #[error("identity threshold {identity} is looser than lookup threshold {lookup}")]
    IdentityBelowLookup { lookup: f64, identity: f64 },
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures surfaced by the aggregation cache.
///
/// Cloneable so every caller joined on one in-flight fetch receives the same
/// outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("no usable record for {0}")]
    NotFound(EntityKey),

    #[error("transient fetch failure for {key}: {reason}")]
    FetchTransient { key: EntityKey, reason: String },

    #[error("{} matches several stored entities: {}", .name, candidate_names(.candidates))]
    Ambiguous {
        name: String,
        candidates: Vec<NameMatch>,
    },

    #[error("store failure: {0}")]
    StoreFailure(Arc<StoreError>),
}

fn candidate_names(candidates: &[NameMatch]) -> String {
    candidates
        .iter()
        .map(|c| format!("{} ({:.0})", c.name, c.score))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::StoreFailure(Arc::new(err))
    }
}

impl CacheError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::FetchTransient { .. })
    }

    /// Hide transport detail from request-path callers.
    pub fn for_request(self) -> CacheError {
        match self {
            CacheError::FetchTransient { key, reason } => {
                tracing::warn!(
                    target: crate::TARGET_CACHE,
                    "Reporting {} as not found after transient failure: {}", key, reason
                );
                CacheError::NotFound(key)
            }
            other => other,
        }
    }
}
