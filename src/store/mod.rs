//! Durable keyed storage for entity snapshots.
//!
//! `EntityStore` is the seam between the aggregation cache and persistence.
//! It is implemented by `Database` (SQLite) and `MemoryStore` (tests and
//! ephemeral runs).

mod memory;

pub use self::memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::{
    EntityKey, EntityKind, EntityProfile, EntitySnapshot, Fixture, NewsItem, RecordCategory,
    RosterEntry, StatLine,
};
use crate::error::StoreError;

/// Replacement of one news pool.
///
/// Every pool listed in `clear_owners` is deleted, then `items` are inserted
/// under the canonical entity name.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsReplace {
    pub clear_owners: Vec<String>,
    pub items: Vec<NewsItem>,
}

/// A write of one entity. `None` categories keep what is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotWrite {
    pub key: EntityKey,
    pub profile: EntityProfile,
    pub fetched_at: DateTime<Utc>,
    pub source_ref: Option<String>,
    pub stats: Option<Vec<StatLine>>,
    pub fixtures: Option<Vec<Fixture>>,
    pub roster: Option<Vec<RosterEntry>>,
    pub news: Option<NewsReplace>,
}

impl SnapshotWrite {
    pub fn new(key: EntityKey, profile: EntityProfile, fetched_at: DateTime<Utc>) -> Self {
        Self {
            key,
            profile,
            fetched_at,
            source_ref: None,
            stats: None,
            fixtures: None,
            roster: None,
            news: None,
        }
    }

    /// Categories this write replaces
    pub fn replaced_categories(&self) -> Vec<RecordCategory> {
        let mut categories = Vec::new();
        if self.stats.is_some() {
            categories.push(RecordCategory::Stats);
        }
        if self.fixtures.is_some() {
            categories.push(RecordCategory::Fixtures);
        }
        if self.roster.is_some() {
            categories.push(RecordCategory::Roster);
        }
        if self.news.is_some() {
            categories.push(RecordCategory::News);
        }
        categories
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Snapshot stored under the key's normalized name or a registered alias of it.
    async fn get(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, StoreError>;

    /// Upsert the entity and replace each present category all-or-nothing.
    async fn put(&self, write: SnapshotWrite) -> Result<EntitySnapshot, StoreError>;

    /// Remove the entity with its related records, news pool and aliases.
    async fn delete(&self, key: &EntityKey) -> Result<bool, StoreError>;

    async fn list_keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError>;

    /// Names news pools are currently stored under.
    async fn news_owners(&self, kind: EntityKind) -> Result<Vec<String>, StoreError>;

    /// Make `alias` resolve to the stored entity named `canonical`.
    async fn add_alias(&self, alias: &EntityKey, canonical: &str) -> Result<(), StoreError>;
}
