//! Fetch-through aggregation cache.
//!
//! Reads are served from the `EntityStore`; a miss fetches from the
//! `SourceFetcher`, reconciles the scraped name against stored entities and
//! writes the result. Concurrent fetches of one key share a single flight,
//! which runs on its own task so a caller that goes away never cancels a
//! fetch other callers are waiting on.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::entity::{
    normalize, EntityKey, EntityKind, EntitySnapshot, NameMatch, RawRecord, Reconciliation,
    RecordCategory, SimilarityMatcher,
};
use crate::error::{CacheError, FetchError, Result};
use crate::fetcher::SourceFetcher;
use crate::store::{EntityStore, NewsReplace, SnapshotWrite};
use crate::TARGET_CACHE;

/// Result of one flight, and whether it called the source to get it
#[derive(Debug, Clone)]
struct Landed {
    snapshot: EntitySnapshot,
    fetched: bool,
}

type Flight = Shared<BoxFuture<'static, Result<Landed>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightMode {
    /// Re-check the store before fetching
    FetchThrough,
    /// Always fetch
    Refresh,
}

struct Inner {
    store: Arc<dyn EntityStore>,
    fetcher: Arc<dyn SourceFetcher>,
    matcher: SimilarityMatcher,
    clock: Arc<dyn Clock>,
    flights: DashMap<EntityKey, Flight>,
    // Serializes reconcile-then-write per kind; never held across a fetch
    player_gate: Mutex<()>,
    team_gate: Mutex<()>,
}

#[derive(Clone)]
pub struct AggregationCache {
    inner: Arc<Inner>,
}

impl AggregationCache {
    pub fn new(
        store: Arc<dyn EntityStore>,
        fetcher: Arc<dyn SourceFetcher>,
        matcher: SimilarityMatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                matcher,
                clock,
                flights: DashMap::new(),
                player_gate: Mutex::new(()),
                team_gate: Mutex::new(()),
            }),
        }
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.inner.matcher
    }

    /// Stored snapshot for `key`, fetching it first if nothing is stored.
    pub async fn get_or_fetch(&self, key: &EntityKey) -> Result<EntitySnapshot> {
        if key.normalized().is_empty() {
            return Err(CacheError::NotFound(key.clone()));
        }
        if let Some(snapshot) = self.inner.store.get(key).await? {
            debug!(target: TARGET_CACHE, "Store hit for {}", key);
            return Ok(snapshot);
        }
        Ok(self.join_flight(key, FlightMode::FetchThrough).await?.snapshot)
    }

    /// Fetch `key` from the source and replace what is stored.
    ///
    /// Joins a flight already running for the key. If that flight was a
    /// fetch-through that found the key stored, a new flight fetches.
    pub async fn refresh(&self, key: &EntityKey) -> Result<EntitySnapshot> {
        if key.normalized().is_empty() {
            return Err(CacheError::NotFound(key.clone()));
        }
        loop {
            let landed = self.join_flight(key, FlightMode::Refresh).await?;
            if landed.fetched {
                return Ok(landed.snapshot);
            }
            debug!(target: TARGET_CACHE, "Joined flight for {} was a store hit, fetching", key);
        }
    }

    /// Stored entities whose names score at or above the lookup threshold.
    pub async fn lookup(&self, kind: EntityKind, name: &str) -> Result<Vec<NameMatch>> {
        let keys = self.inner.store.list_keys(kind).await?;
        Ok(self
            .inner
            .matcher
            .lookup(name, keys.iter().map(|k| k.name.as_str())))
    }

    /// Free-text read: exact or alias hit, then a single fuzzy match, then fetch.
    ///
    /// Several fuzzy matches are reported as `Ambiguous` rather than picking one.
    pub async fn resolve(&self, kind: EntityKind, name: &str) -> Result<EntitySnapshot> {
        let key = EntityKey::new(kind, name);
        if key.normalized().is_empty() {
            return Err(CacheError::NotFound(key));
        }
        if let Some(snapshot) = self.inner.store.get(&key).await? {
            return Ok(snapshot);
        }

        let matches = self.lookup(kind, &key.name).await?;
        match matches.len() {
            0 => self.get_or_fetch(&key).await,
            1 => {
                let stored = EntityKey::new(kind, matches[0].name.as_str());
                debug!(
                    target: TARGET_CACHE,
                    "Resolved '{}' to {} (score {:.1})", key.name, stored, matches[0].score
                );
                match self.inner.store.get(&stored).await? {
                    Some(snapshot) => Ok(snapshot),
                    None => self.get_or_fetch(&key).await,
                }
            }
            _ => Err(CacheError::Ambiguous {
                name: key.name,
                candidates: matches,
            }),
        }
    }

    /// Every stored key of every kind
    pub async fn known_keys(&self) -> Result<Vec<EntityKey>> {
        let mut keys = Vec::new();
        for kind in EntityKind::ALL {
            keys.extend(self.inner.store.list_keys(kind).await?);
        }
        Ok(keys)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    async fn join_flight(&self, key: &EntityKey, mode: FlightMode) -> Result<Landed> {
        let flight = match self.inner.flights.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(target: TARGET_CACHE, "Joining in-flight fetch for {}", key);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let inner = Arc::clone(&self.inner);
                let flight_key = key.clone();
                let task = tokio::spawn(async move {
                    let result = inner.run_flight(&flight_key, mode).await;
                    inner.flights.remove(&flight_key);
                    result
                });

                let failed_key = key.clone();
                let flight: Flight = async move {
                    task.await.unwrap_or_else(|e| {
                        error!(target: TARGET_CACHE, "Fetch task for {} failed: {}", failed_key, e);
                        Err(CacheError::FetchTransient {
                            key: failed_key,
                            reason: "refresh task failed".to_string(),
                        })
                    })
                }
                .boxed()
                .shared();

                entry.insert(flight.clone());
                flight
            }
        };
        flight.await
    }
}

impl Inner {
    fn write_gate(&self, kind: EntityKind) -> &Mutex<()> {
        match kind {
            EntityKind::Player => &self.player_gate,
            EntityKind::Team => &self.team_gate,
        }
    }

    #[instrument(target = "cache", level = "debug", skip(self, key), fields(key = %key))]
    async fn run_flight(&self, key: &EntityKey, mode: FlightMode) -> Result<Landed> {
        if mode == FlightMode::FetchThrough {
            // Another flight may have stored it since the caller's miss
            if let Some(snapshot) = self.store.get(key).await? {
                return Ok(Landed {
                    snapshot,
                    fetched: false,
                });
            }
        }

        let record = match self.fetcher.fetch(key).await {
            Ok(record) => record,
            Err(FetchError::NotFound) => {
                info!(target: TARGET_CACHE, "Source has no record for {}", key);
                return Err(CacheError::NotFound(key.clone()));
            }
            Err(FetchError::Transient(reason)) => {
                warn!(target: TARGET_CACHE, "Fetch of {} failed: {}", key, reason);
                return Err(CacheError::FetchTransient {
                    key: key.clone(),
                    reason,
                });
            }
        };

        if record.name.trim().is_empty() || record.profile.kind() != key.kind {
            warn!(
                target: TARGET_CACHE,
                "Discarding unusable {} record '{}' fetched for {}",
                record.profile.kind(),
                record.name,
                key
            );
            return Err(CacheError::NotFound(key.clone()));
        }

        let snapshot = self.commit(key, record).await?;
        Ok(Landed {
            snapshot,
            fetched: true,
        })
    }

    async fn commit(&self, requested: &EntityKey, record: RawRecord) -> Result<EntitySnapshot> {
        let kind = requested.kind;
        let _gate = self.write_gate(kind).lock().await;

        let stored = self.store.list_keys(kind).await?;
        let canonical = match self
            .matcher
            .reconcile(&record.name, stored.iter().map(|k| k.name.as_str()))
        {
            Reconciliation::Same(existing) => {
                if existing.name != record.name {
                    debug!(
                        target: TARGET_CACHE,
                        "'{}' is stored as '{}' (score {:.1})", record.name, existing.name, existing.score
                    );
                }
                existing.name
            }
            Reconciliation::New => record.name.trim().to_string(),
            Reconciliation::Ambiguous(candidates) => {
                warn!(
                    target: TARGET_CACHE,
                    "Not storing '{}': {} stored entities match equally", record.name, candidates.len()
                );
                return Err(CacheError::Ambiguous {
                    name: record.name,
                    candidates,
                });
            }
        };

        let canonical_key = EntityKey::new(kind, canonical.as_str());
        let mut write = SnapshotWrite::new(
            canonical_key.clone(),
            record.profile.renamed(&canonical),
            self.clock.now(),
        );
        write.source_ref = record.source_ref;

        for (category, reason) in [
            (RecordCategory::Stats, record.stats.failure()),
            (RecordCategory::Fixtures, record.fixtures.failure()),
            (RecordCategory::Roster, record.roster.failure()),
            (RecordCategory::News, record.news.failure()),
        ] {
            if let Some(reason) = reason {
                warn!(
                    target: TARGET_CACHE,
                    "Keeping stored {} of {}: {}", category, canonical_key, reason
                );
            }
        }

        write.stats = record
            .stats
            .into_replacement()
            .map(|lines| {
                lines
                    .into_iter()
                    .filter(|line| line.kind() == kind)
                    .collect::<Vec<_>>()
            })
            .filter(|lines| !lines.is_empty());
        if kind == EntityKind::Team {
            write.fixtures = record.fixtures.into_replacement();
            write.roster = record.roster.into_replacement();
        }

        if let Some(items) = record.news.into_replacement() {
            // Pools named after another stored entity are that entity's news
            let others: HashSet<String> = stored
                .iter()
                .map(EntityKey::normalized)
                .filter(|name| *name != canonical_key.normalized())
                .collect();
            let owners: Vec<String> = self
                .store
                .news_owners(kind)
                .await?
                .into_iter()
                .filter(|owner| !others.contains(&normalize(owner)))
                .collect();
            match self
                .matcher
                .reconcile(&canonical, owners.iter().map(String::as_str))
            {
                Reconciliation::Same(owner) => {
                    write.news = Some(NewsReplace {
                        clear_owners: vec![owner.name],
                        items,
                    })
                }
                Reconciliation::New => {
                    write.news = Some(NewsReplace {
                        clear_owners: Vec::new(),
                        items,
                    })
                }
                Reconciliation::Ambiguous(pools) => warn!(
                    target: TARGET_CACHE,
                    "Keeping stored news of {}: pools {:?} match equally",
                    canonical_key,
                    pools.iter().map(|p| &p.name).collect::<Vec<_>>()
                ),
            }
        }

        let replaced = write.replaced_categories();
        let snapshot = self.store.put(write).await.map_err(|e| {
            error!(target: TARGET_CACHE, "Failed to store {}: {}", canonical_key, e);
            CacheError::from(e)
        })?;

        if requested.normalized() != canonical_key.normalized() {
            if let Err(e) = self.store.add_alias(requested, &canonical).await {
                warn!(
                    target: TARGET_CACHE,
                    "Could not register '{}' as alias of {}: {}", requested.name, canonical_key, e
                );
            }
        }

        info!(
            target: TARGET_CACHE,
            "Stored {} replacing {:?}", canonical_key, replaced
        );
        Ok(snapshot)
    }
}
