use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::normalizer::normalize;

/// Kind of tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Player,
    Team,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Player, EntityKind::Team];

    /// Path segment used by the HTTP surfaces
    pub fn as_path(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Team => "team",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Player => write!(f, "PLAYER"),
            EntityKind::Team => write!(f, "TEAM"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PLAYER" | "PLAYERS" => Ok(EntityKind::Player),
            "TEAM" | "TEAMS" => Ok(EntityKind::Team),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Identifies an entity by kind and free-text name.
///
/// Two keys are equal when their kinds match and their names normalize to the
/// same string, so "Chelsea", " chelsea " and "CHELSEA" are one key. The
/// original spelling is kept for display and for the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into().trim().to_string(),
        }
    }

    pub fn player(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Player, name)
    }

    pub fn team(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Team, name)
    }

    pub fn normalized(&self) -> String {
        normalize(&self.name)
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.normalized() == other.normalized()
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.normalized().hash(state);
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub positions: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub shirt_no: String,
    #[serde(default)]
    pub player_img: String,
    #[serde(default)]
    pub club_img: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProfile {
    pub name: String,
    #[serde(default)]
    pub team_img: String,
}

/// Top-level record of an entity, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityProfile {
    Player(PlayerProfile),
    Team(TeamProfile),
}

impl EntityProfile {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityProfile::Player(_) => EntityKind::Player,
            EntityProfile::Team(_) => EntityKind::Team,
        }
    }

    /// Returns the profile with its name replaced by the canonical stored name
    pub fn renamed(mut self, name: &str) -> Self {
        match &mut self {
            EntityProfile::Player(p) => p.name = name.to_string(),
            EntityProfile::Team(t) => t.name = name.to_string(),
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatLine {
    pub tournament: String,
    pub apps: String,
    pub goals: String,
    pub assists: String,
    pub yellow: String,
    pub red: String,
    pub motm: String,
    pub rating: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStatLine {
    pub tournament: String,
    pub apps: String,
    pub goals: String,
    pub shots_pg: String,
    pub poss: String,
    pub passes: String,
    pub rating: String,
}

/// A stat line belongs to either a player or a team table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatLine {
    Player(PlayerStatLine),
    Team(TeamStatLine),
}

impl StatLine {
    pub fn kind(&self) -> EntityKind {
        match self {
            StatLine::Player(_) => EntityKind::Player,
            StatLine::Team(_) => EntityKind::Team,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub league: String,
    pub date: String,
    pub home: String,
    pub result: String,
    pub away: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub img: String,
    pub dob: String,
    pub nat: String,
    pub market_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub news_img: String,
    pub news_link: String,
    pub news_title: String,
}

/// Related-record categories replaced independently on refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordCategory {
    Stats,
    Fixtures,
    Roster,
    News,
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordCategory::Stats => write!(f, "stats"),
            RecordCategory::Fixtures => write!(f, "fixtures"),
            RecordCategory::Roster => write!(f, "roster"),
            RecordCategory::News => write!(f, "news"),
        }
    }
}

/// Outcome of scraping one related-record category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "records", rename_all = "lowercase")]
pub enum CategoryFetch<T> {
    Fetched(Vec<T>),
    Failed(String),
    Unavailable,
}

impl<T> Default for CategoryFetch<T> {
    fn default() -> Self {
        CategoryFetch::Unavailable
    }
}

impl<T> CategoryFetch<T> {
    /// Records to commit, if this category produced new data.
    ///
    /// An empty scrape counts as no new data: the stored set stays as is.
    pub fn into_replacement(self) -> Option<Vec<T>> {
        match self {
            CategoryFetch::Fetched(records) if !records.is_empty() => Some(records),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            CategoryFetch::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Everything one fetch from the source returned for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// The source's spelling of the entity name
    pub name: String,
    #[serde(default)]
    pub source_ref: Option<String>,
    pub profile: EntityProfile,
    #[serde(default)]
    pub stats: CategoryFetch<StatLine>,
    #[serde(default)]
    pub fixtures: CategoryFetch<Fixture>,
    #[serde(default)]
    pub roster: CategoryFetch<RosterEntry>,
    #[serde(default)]
    pub news: CategoryFetch<NewsItem>,
}

/// Current stored representation of an entity plus its related records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub key: EntityKey,
    pub profile: EntityProfile,
    pub stats: Vec<StatLine>,
    pub fixtures: Vec<Fixture>,
    pub roster: Vec<RosterEntry>,
    pub news: Vec<NewsItem>,
    pub fetched_at: DateTime<Utc>,
    pub source_ref: Option<String>,
}

impl EntitySnapshot {
    /// Related records only, for comparing two snapshots of the same entity
    pub fn same_records(&self, other: &EntitySnapshot) -> bool {
        self.profile == other.profile
            && self.stats == other.stats
            && self.fixtures == other.fixtures
            && self.roster == other.roster
            && self.news == other.news
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_ignores_case_and_spacing() {
        assert_eq!(EntityKey::team("Chelsea"), EntityKey::team("  CHELSEA "));
        assert_eq!(
            EntityKey::team("Manchester  United"),
            EntityKey::team("manchester united")
        );
        assert_ne!(EntityKey::team("Chelsea"), EntityKey::player("Chelsea"));

        let mut set = HashSet::new();
        set.insert(EntityKey::team("Arsenal"));
        assert!(set.contains(&EntityKey::team("arsenal")));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("team".parse::<EntityKind>(), Ok(EntityKind::Team));
        assert_eq!("PLAYERS".parse::<EntityKind>(), Ok(EntityKind::Player));
        assert!("coach".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_empty_fetch_is_not_a_replacement() {
        let empty: CategoryFetch<Fixture> = CategoryFetch::Fetched(vec![]);
        assert_eq!(empty.into_replacement(), None);

        let failed: CategoryFetch<Fixture> = CategoryFetch::Failed("timeout".into());
        assert_eq!(failed.failure(), Some("timeout"));
        assert_eq!(failed.into_replacement(), None);

        let fetched = CategoryFetch::Fetched(vec![Fixture::default()]);
        assert_eq!(fetched.into_replacement().map(|f| f.len()), Some(1));
    }

    #[test]
    fn test_raw_record_wire_format() {
        let json = r#"{
            "name": "Chelsea",
            "profile": {"kind": "team", "name": "Chelsea", "team_img": "crest.png"},
            "news": {"status": "fetched", "records": [
                {"news_img": "a.png", "news_link": "https://a", "news_title": "A"}
            ]},
            "fixtures": {"status": "failed", "records": "page layout changed"}
        }"#;

        let record: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.profile.kind(), EntityKind::Team);
        assert_eq!(record.stats, CategoryFetch::Unavailable);
        assert_eq!(record.fixtures.failure(), Some("page layout changed"));
        assert!(matches!(record.news, CategoryFetch::Fetched(ref items) if items.len() == 1));
    }
}
