use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::SourceFetcher;
use crate::entity::{EntityKey, RawRecord};
use crate::error::FetchError;
use crate::TARGET_WEB_REQUEST;

/// Fetches records from an upstream scraper service.
///
/// `GET {base}/{player|team}/{name}` must answer with a `RawRecord` as JSON,
/// or 404 when the source has nothing under that name.
#[derive(Clone)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    base: Url,
}

impl HttpSourceFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("source URL {} cannot be used as a base", base_url));
        }

        let client = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client, base })
    }

    fn record_url(&self, key: &EntityKey) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(key.kind.as_path())
                .push(&key.name);
        }
        url
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<RawRecord, FetchError> {
        let url = self.record_url(key);
        debug!(target: TARGET_WEB_REQUEST, "Requesting {} from {}", key, url);

        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(target: TARGET_WEB_REQUEST, "Request to {} failed: {}", url, e);
                FetchError::Transient(e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => {
                let record = response.json::<RawRecord>().await.map_err(|e| {
                    warn!(target: TARGET_WEB_REQUEST, "Undecodable record from {}: {}", url, e);
                    FetchError::Transient(format!("undecodable record: {}", e))
                })?;
                info!(target: TARGET_WEB_REQUEST, "Fetched {} as '{}'", key, record.name);
                Ok(record)
            }
            StatusCode::NOT_FOUND => {
                info!(target: TARGET_WEB_REQUEST, "Source has no record for {}", key);
                Err(FetchError::NotFound)
            }
            status => {
                warn!(target: TARGET_WEB_REQUEST, "Request to {} returned status {}", url, status);
                Err(FetchError::Transient(format!("status {}", status)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::scripted::team_record;
    use axum::{extract::Path, http::StatusCode as AxumStatus, routing::get, Json, Router};

    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/team/{name}",
                get(|Path(name): Path<String>| async move {
                    match name.as_str() {
                        "Chelsea" => Ok(Json(team_record("Chelsea"))),
                        "Broken" => Err(AxumStatus::BAD_GATEWAY),
                        _ => Err(AxumStatus::NOT_FOUND),
                    }
                }),
            )
            .route("/player/{name}", get(|| async { "not json" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_record_url_escapes_name() {
        let fetcher = HttpSourceFetcher::new("http://scraper.local/api/").unwrap();
        let url = fetcher.record_url(&EntityKey::team("Paris Saint-Germain"));
        assert_eq!(
            url.as_str(),
            "http://scraper.local/api/team/Paris%20Saint-Germain"
        );
    }

    #[test]
    fn test_rejects_unusable_base() {
        assert!(HttpSourceFetcher::new("mailto:scraper@example.com").is_err());
        assert!(HttpSourceFetcher::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let fetcher = HttpSourceFetcher::new(&serve().await).unwrap();

        let record = fetcher.fetch(&EntityKey::team("Chelsea")).await.unwrap();
        assert_eq!(record, team_record("Chelsea"));

        assert_eq!(
            fetcher.fetch(&EntityKey::team("Nobody")).await,
            Err(FetchError::NotFound)
        );
        assert!(matches!(
            fetcher.fetch(&EntityKey::team("Broken")).await,
            Err(FetchError::Transient(_))
        ));
        assert!(matches!(
            fetcher.fetch(&EntityKey::player("Anyone")).await,
            Err(FetchError::Transient(_))
        ));
    }
}
