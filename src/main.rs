use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use sportcache::api::api_loop;
use sportcache::cache::AggregationCache;
use sportcache::clock::SystemClock;
use sportcache::db::Database;
use sportcache::entity::SimilarityMatcher;
use sportcache::environment::Settings;
use sportcache::fetcher::{HttpSourceFetcher, TimeoutFetcher};
use sportcache::logging::configure_logging;
use sportcache::scheduler::RefreshScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let settings = Settings::from_env();
    info!("Starting with {:?}", settings);

    let db = Database::new(&settings.database_path)
        .await
        .context("Failed to open database")?;
    info!("Stored rows: {}", db.collect_stats().await?);

    let fetcher = TimeoutFetcher::new(
        HttpSourceFetcher::new(&settings.source_url)?,
        settings.fetch_timeout,
    );
    let matcher = SimilarityMatcher::new(settings.lookup_threshold, settings.identity_threshold)?;
    let clock = Arc::new(SystemClock);
    let cache = AggregationCache::new(Arc::new(db), Arc::new(fetcher), matcher, clock.clone());

    let scheduler = RefreshScheduler::new(
        cache.clone(),
        clock,
        settings.refresh_interval,
        settings.max_concurrent_refreshes,
    );
    scheduler.start();

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.listen_addr))?;

    let shutdown = async {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        info!("Shutdown requested");
    };
    let served = api_loop(cache, listener, shutdown).await;

    scheduler.stop().await;
    served
}
