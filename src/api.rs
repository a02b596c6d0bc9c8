use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cache::AggregationCache;
use crate::entity::{EntityKey, EntityKind, EntitySnapshot, NameMatch, NewsItem};
use crate::error::CacheError;
use crate::TARGET_WEB_REQUEST;

enum ApiError {
    Cache(CacheError),
    UnknownKind(String),
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache(err.for_request())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Cache(err) => err,
            ApiError::UnknownKind(kind) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unknown entity kind '{}'", kind) })),
                )
                    .into_response()
            }
        };
        let (status, body) = match &err {
            CacheError::NotFound(key) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{} not found", key.name) }),
            ),
            // Only reachable if a caller skipped for_request
            CacheError::FetchTransient { key, .. } => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{} not found", key.name) }),
            ),
            CacheError::Ambiguous { name, candidates } => (
                StatusCode::CONFLICT,
                json!({
                    "error": format!("'{}' matches several entities", name),
                    "candidates": candidates,
                }),
            ),
            CacheError::StoreFailure(e) => {
                error!(target: TARGET_WEB_REQUEST, "Store failure while serving request: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_kind(kind: &str) -> std::result::Result<EntityKind, ApiError> {
    kind.parse()
        .map_err(|_| ApiError::UnknownKind(kind.to_string()))
}

async fn get_player(
    State(cache): State<AggregationCache>,
    Path(name): Path<String>,
) -> ApiResult<EntitySnapshot> {
    info!(target: TARGET_WEB_REQUEST, "GET player {}", name);
    Ok(Json(cache.resolve(EntityKind::Player, &name).await?))
}

async fn get_team(
    State(cache): State<AggregationCache>,
    Path(name): Path<String>,
) -> ApiResult<EntitySnapshot> {
    info!(target: TARGET_WEB_REQUEST, "GET team {}", name);
    Ok(Json(cache.resolve(EntityKind::Team, &name).await?))
}

async fn refresh_player(
    State(cache): State<AggregationCache>,
    Path(name): Path<String>,
) -> ApiResult<EntitySnapshot> {
    info!(target: TARGET_WEB_REQUEST, "Refresh requested for player {}", name);
    Ok(Json(cache.refresh(&EntityKey::player(name)).await?))
}

async fn refresh_team(
    State(cache): State<AggregationCache>,
    Path(name): Path<String>,
) -> ApiResult<EntitySnapshot> {
    info!(target: TARGET_WEB_REQUEST, "Refresh requested for team {}", name);
    Ok(Json(cache.refresh(&EntityKey::team(name)).await?))
}

async fn search(
    State(cache): State<AggregationCache>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<Vec<NameMatch>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(cache.lookup(kind, &name).await?))
}

async fn news(
    State(cache): State<AggregationCache>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<Vec<NewsItem>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(cache.resolve(kind, &name).await?.news))
}

pub fn router(cache: AggregationCache) -> Router {
    Router::new()
        .route("/players/{name}", get(get_player))
        .route("/teams/{name}", get(get_team))
        .route("/players/{name}/refresh", post(refresh_player))
        .route("/teams/{name}/refresh", post(refresh_team))
        .route("/search/{kind}/{name}", get(search))
        .route("/news/{kind}/{name}", get(news))
        .with_state(cache)
}

/// Serve the API until `shutdown` resolves
pub async fn api_loop(
    cache: AggregationCache,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(
        target: TARGET_WEB_REQUEST,
        "Server running on http://{}", listener.local_addr()?
    );
    axum::serve(listener, router(cache))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
