pub mod normalizer;
pub mod types;

pub use normalizer::{normalize, NameMatch, Reconciliation, SimilarityMatcher};
pub use types::*;
