use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use sportcache::cache::AggregationCache;
use sportcache::clock::SystemClock;
use sportcache::db::Database;
use sportcache::entity::{normalize, EntityKey, EntityKind, SimilarityMatcher};
use sportcache::environment::Settings;
use sportcache::fetcher::{HttpSourceFetcher, TimeoutFetcher};
use sportcache::scheduler::RefreshScheduler;
use sportcache::store::EntityStore;

#[derive(Parser)]
#[command(author, version, about = "Administrative triggers for the sports cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one entity from the source and replace what is stored
    Refresh {
        /// Entity kind (player, team)
        kind: EntityKind,
        name: String,
    },

    /// Run one scheduler tick over every stored entity
    RefreshAll,

    /// List stored entities matching a free-text name
    Lookup { kind: EntityKind, name: String },

    /// List stored entities of one kind
    List { kind: EntityKind },

    /// Delete an entity with its related records, news and aliases
    Delete { kind: EntityKind, name: String },

    /// Show the similarity score of two names
    Score { a: String, b: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    sportcache::logging::configure_logging();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let matcher = SimilarityMatcher::new(settings.lookup_threshold, settings.identity_threshold)?;

    let db = Database::new(&settings.database_path)
        .await
        .context("Failed to connect to database")?;
    let fetcher = TimeoutFetcher::new(
        HttpSourceFetcher::new(&settings.source_url)?,
        settings.fetch_timeout,
    );
    let clock = Arc::new(SystemClock);
    let cache = AggregationCache::new(
        Arc::new(db.clone()),
        Arc::new(fetcher),
        matcher,
        clock.clone(),
    );

    match cli.command {
        Commands::Refresh { kind, name } => {
            let snapshot = cache.refresh(&EntityKey::new(kind, name)).await?;
            println!(
                "Refreshed {}: {} stat lines, {} fixtures, {} roster entries, {} news items",
                snapshot.key,
                snapshot.stats.len(),
                snapshot.fixtures.len(),
                snapshot.roster.len(),
                snapshot.news.len()
            );
        }

        Commands::RefreshAll => {
            let scheduler = RefreshScheduler::new(
                cache,
                clock,
                settings.refresh_interval,
                settings.max_concurrent_refreshes,
            );
            let report = scheduler.run_tick().await;
            println!("Refreshed {} entities", report.refreshed.len());
            for (key, err) in &report.failed {
                println!("  failed {}: {}", key, err);
            }
        }

        Commands::Lookup { kind, name } => {
            let matches = cache.lookup(kind, &name).await?;
            if matches.is_empty() {
                println!("No stored {} matches '{}'", kind, name);
            }
            for m in matches {
                println!("{:>5.1}  {}", m.score, m.name);
            }
        }

        Commands::List { kind } => {
            let keys = db.list_keys(kind).await?;
            println!("{} stored {} entities", keys.len(), kind);
            for key in keys {
                println!("  {}", key.name);
            }
        }

        Commands::Delete { kind, name } => {
            let key = EntityKey::new(kind, name);
            info!("Deleting {}", key);
            if db.delete(&key).await? {
                println!("Deleted {}", key);
            } else {
                println!("{} is not stored", key);
            }
        }

        Commands::Score { a, b } => {
            let score = cache.matcher().score(&a, &b);
            println!("'{}' -> '{}'", a, normalize(&a));
            println!("'{}' -> '{}'", b, normalize(&b));
            println!(
                "score {:.1} (lookup match: {}, same entity: {})",
                score,
                score >= cache.matcher().lookup_threshold(),
                cache.matcher().is_same_entity(&a, &b)
            );
        }
    }

    info!("Stored rows: {}", db.collect_stats().await?);
    Ok(())
}
