use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{EntityStore, SnapshotWrite};
use crate::entity::{
    normalize, EntityKey, EntityKind, EntityProfile, EntitySnapshot, Fixture, NewsItem,
    RosterEntry, StatLine,
};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredEntity {
    name: String,
    profile: EntityProfile,
    stats: Vec<StatLine>,
    fixtures: Vec<Fixture>,
    roster: Vec<RosterEntry>,
    fetched_at: DateTime<Utc>,
    source_ref: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    entities: HashMap<(EntityKind, String), StoredEntity>,
    // (kind, normalized owner) -> (owner as written, items)
    news: HashMap<(EntityKind, String), (String, Vec<NewsItem>)>,
    // (kind, normalized alias) -> normalized canonical name
    aliases: HashMap<(EntityKind, String), String>,
}

impl State {
    fn resolve(&self, key: &EntityKey) -> Option<String> {
        let normalized = key.normalized();
        if self.entities.contains_key(&(key.kind, normalized.clone())) {
            return Some(normalized);
        }
        self.aliases.get(&(key.kind, normalized)).cloned()
    }

    fn snapshot(&self, kind: EntityKind, normalized: &str) -> Option<EntitySnapshot> {
        let stored = self.entities.get(&(kind, normalized.to_string()))?;
        let news = self
            .news
            .get(&(kind, normalized.to_string()))
            .map(|(_, items)| items.clone())
            .unwrap_or_default();

        Some(EntitySnapshot {
            key: EntityKey::new(kind, stored.name.clone()),
            profile: stored.profile.clone(),
            stats: stored.stats.clone(),
            fixtures: stored.fixtures.clone(),
            roster: stored.roster.clone(),
            news,
            fetched_at: stored.fetched_at,
            source_ref: stored.source_ref.clone(),
        })
    }
}

/// In-process `EntityStore` with the same replace semantics as `Database`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, StoreError> {
        let state = self.read();
        Ok(state
            .resolve(key)
            .and_then(|normalized| state.snapshot(key.kind, &normalized)))
    }

    async fn put(&self, write: SnapshotWrite) -> Result<EntitySnapshot, StoreError> {
        let kind = write.key.kind;
        let normalized = write.key.normalized();
        let mut state = self.write();

        let entry = state
            .entities
            .entry((kind, normalized.clone()))
            .or_insert_with(|| StoredEntity {
                name: write.key.name.clone(),
                profile: write.profile.clone(),
                stats: Vec::new(),
                fixtures: Vec::new(),
                roster: Vec::new(),
                fetched_at: write.fetched_at,
                source_ref: None,
            });

        entry.profile = write.profile;
        entry.fetched_at = write.fetched_at;
        entry.source_ref = write.source_ref;
        if let Some(stats) = write.stats {
            entry.stats = stats;
        }
        if let Some(fixtures) = write.fixtures {
            entry.fixtures = fixtures;
        }
        if let Some(roster) = write.roster {
            entry.roster = roster;
        }

        if let Some(news) = write.news {
            for owner in &news.clear_owners {
                state.news.remove(&(kind, normalize(owner)));
            }
            state
                .news
                .insert((kind, normalized.clone()), (write.key.name.clone(), news.items));
        }

        state
            .snapshot(kind, &normalized)
            .ok_or(StoreError::Missing(write.key))
    }

    async fn delete(&self, key: &EntityKey) -> Result<bool, StoreError> {
        let mut state = self.write();
        let Some(normalized) = state.resolve(key) else {
            return Ok(false);
        };

        state.entities.remove(&(key.kind, normalized.clone()));
        state.news.remove(&(key.kind, normalized.clone()));
        state
            .aliases
            .retain(|(kind, _), canonical| !(*kind == key.kind && *canonical == normalized));
        Ok(true)
    }

    async fn list_keys(&self, kind: EntityKind) -> Result<Vec<EntityKey>, StoreError> {
        let state = self.read();
        let mut keys: Vec<EntityKey> = state
            .entities
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, stored)| EntityKey::new(kind, stored.name.clone()))
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn news_owners(&self, kind: EntityKind) -> Result<Vec<String>, StoreError> {
        let state = self.read();
        let mut owners: Vec<String> = state
            .news
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, (owner, _))| owner.clone())
            .collect();
        owners.sort();
        Ok(owners)
    }

    async fn add_alias(&self, alias: &EntityKey, canonical: &str) -> Result<(), StoreError> {
        let canonical = normalize(canonical);
        let alias_normalized = alias.normalized();
        let mut state = self.write();

        if !state.entities.contains_key(&(alias.kind, canonical.clone())) {
            return Err(StoreError::Missing(EntityKey::new(alias.kind, canonical)));
        }
        if alias_normalized == canonical
            || state.entities.contains_key(&(alias.kind, alias_normalized.clone()))
        {
            return Ok(());
        }

        state.aliases.insert((alias.kind, alias_normalized), canonical);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TeamProfile;
    use crate::store::NewsReplace;

    fn team_write(name: &str) -> SnapshotWrite {
        SnapshotWrite::new(
            EntityKey::team(name),
            EntityProfile::Team(TeamProfile {
                name: name.to_string(),
                team_img: String::new(),
            }),
            Utc::now(),
        )
    }

    fn fixture(home: &str, away: &str) -> Fixture {
        Fixture {
            league: "EPL".into(),
            date: "2024-05-01".into(),
            home: home.into(),
            result: "vs".into(),
            away: away.into(),
        }
    }

    #[tokio::test]
    async fn test_absent_categories_are_kept() {
        let store = MemoryStore::new();

        let mut first = team_write("Chelsea");
        first.fixtures = Some(vec![fixture("Chelsea", "Arsenal")]);
        store.put(first).await.unwrap();

        let mut second = team_write("Chelsea");
        second.roster = Some(vec![RosterEntry {
            name: "Cole Palmer".into(),
            ..Default::default()
        }]);
        let snapshot = store.put(second).await.unwrap();

        assert_eq!(snapshot.fixtures, vec![fixture("Chelsea", "Arsenal")]);
        assert_eq!(snapshot.roster.len(), 1);
    }

    #[tokio::test]
    async fn test_news_replace_clears_listed_pools() {
        let store = MemoryStore::new();
        let item = |title: &str| NewsItem {
            news_title: title.into(),
            ..Default::default()
        };

        let mut write = team_write("Chelsea FC");
        write.news = Some(NewsReplace {
            clear_owners: vec![],
            items: vec![item("old")],
        });
        store.put(write).await.unwrap();

        let mut write = team_write("Chelsea");
        write.news = Some(NewsReplace {
            clear_owners: vec!["Chelsea FC".into()],
            items: vec![item("new")],
        });
        let snapshot = store.put(write).await.unwrap();

        assert_eq!(snapshot.news, vec![item("new")]);
        assert_eq!(
            store.news_owners(EntityKind::Team).await.unwrap(),
            vec!["Chelsea".to_string()]
        );
    }

    #[tokio::test]
    async fn test_alias_resolves_and_delete_cascades() {
        let store = MemoryStore::new();
        store.put(team_write("Manchester United")).await.unwrap();
        store
            .add_alias(&EntityKey::team("Man Utd"), "Manchester United")
            .await
            .unwrap();

        let snapshot = store.get(&EntityKey::team("man utd")).await.unwrap().unwrap();
        assert_eq!(snapshot.key.name, "Manchester United");

        assert!(store.delete(&EntityKey::team("Man Utd")).await.unwrap());
        assert!(store.get(&EntityKey::team("Manchester United")).await.unwrap().is_none());
        assert!(store.get(&EntityKey::team("Man Utd")).await.unwrap().is_none());
        assert!(!store.delete(&EntityKey::team("Man Utd")).await.unwrap());
    }

    #[tokio::test]
    async fn test_alias_requires_stored_entity() {
        let store = MemoryStore::new();
        let result = store.add_alias(&EntityKey::team("Spurs"), "Tottenham").await;
        assert!(matches!(result, Err(StoreError::Missing(_))));
    }
}
