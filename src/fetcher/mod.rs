//! The scraping layer as seen by the cache: something that turns an entity
//! key into a `RawRecord`, slowly and sometimes not at all.

mod http;
#[cfg(test)]
pub(crate) mod scripted;

pub use self::http::HttpSourceFetcher;

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::entity::{EntityKey, RawRecord};
use crate::error::FetchError;
use crate::TARGET_WEB_REQUEST;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Must be safe to call concurrently for distinct keys.
    async fn fetch(&self, key: &EntityKey) -> Result<RawRecord, FetchError>;
}

/// Bounds every fetch of the wrapped fetcher; expiry is a transient failure.
pub struct TimeoutFetcher<F> {
    inner: F,
    timeout: Duration,
}

impl<F: SourceFetcher> TimeoutFetcher<F> {
    pub fn new(inner: F, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<F: SourceFetcher> SourceFetcher for TimeoutFetcher<F> {
    async fn fetch(&self, key: &EntityKey) -> Result<RawRecord, FetchError> {
        match tokio::time::timeout(self.timeout, self.inner.fetch(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(target: TARGET_WEB_REQUEST, "Fetch of {} timed out after {:?}", key, self.timeout);
                Err(FetchError::Transient(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedFetcher;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_transient() {
        let slow = ScriptedFetcher::new().with_delay(Duration::from_secs(120));
        slow.set_team("Chelsea");
        let fetcher = TimeoutFetcher::new(slow, Duration::from_secs(60));

        let result = fetcher.fetch(&EntityKey::team("Chelsea")).await;
        assert!(matches!(result, Err(FetchError::Transient(_))));
    }

    #[tokio::test]
    async fn test_fast_fetch_passes_through() {
        let inner = ScriptedFetcher::new();
        inner.set_team("Chelsea");
        let fetcher = TimeoutFetcher::new(inner, Duration::from_secs(60));

        let record = fetcher.fetch(&EntityKey::team("chelsea")).await.unwrap();
        assert_eq!(record.name, "Chelsea");
        assert_eq!(
            fetcher.fetch(&EntityKey::team("Arsenal")).await,
            Err(FetchError::NotFound)
        );
    }
}
