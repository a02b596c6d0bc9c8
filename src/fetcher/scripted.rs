use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::SourceFetcher;
use crate::entity::{
    CategoryFetch, EntityKey, EntityProfile, NewsItem, PlayerProfile, RawRecord,
    TeamProfile,
};
use crate::error::FetchError;

/// Fetcher answering from a table of canned responses, counting calls.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    responses: Mutex<HashMap<EntityKey, Result<RawRecord, FetchError>>>,
    calls: Mutex<HashMap<EntityKey, usize>>,
    total: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    disabled: AtomicBool,
    delay: Option<Duration>,
}

pub(crate) fn team_record(name: &str) -> RawRecord {
    RawRecord {
        name: name.to_string(),
        source_ref: Some(format!("https://source.test/team/{}", name)),
        profile: EntityProfile::Team(TeamProfile {
            name: name.to_string(),
            team_img: format!("{}.png", name),
        }),
        stats: CategoryFetch::Unavailable,
        fixtures: CategoryFetch::Unavailable,
        roster: CategoryFetch::Unavailable,
        news: CategoryFetch::Unavailable,
    }
}

pub(crate) fn player_record(name: &str) -> RawRecord {
    RawRecord {
        profile: EntityProfile::Player(PlayerProfile {
            name: name.to_string(),
            ..Default::default()
        }),
        source_ref: Some(format!("https://source.test/player/{}", name)),
        ..team_record(name)
    }
}

pub(crate) fn news(titles: &[&str]) -> CategoryFetch<NewsItem> {
    CategoryFetch::Fetched(
        titles
            .iter()
            .map(|t| NewsItem {
                news_img: String::new(),
                news_link: format!("https://news.test/{}", t),
                news_title: t.to_string(),
            })
            .collect(),
    )
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn respond(&self, key: EntityKey, response: Result<RawRecord, FetchError>) {
        self.responses.lock().unwrap().insert(key, response);
    }

    pub(crate) fn set_team(&self, name: &str) {
        self.respond(EntityKey::team(name), Ok(team_record(name)));
    }

    pub(crate) fn set_player(&self, name: &str) {
        self.respond(EntityKey::player(name), Ok(player_record(name)));
    }

    /// Every later fetch fails as if the source were unreachable
    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Most fetches observed running at once
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self, key: &EntityKey) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<RawRecord, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.disabled.load(Ordering::SeqCst) {
            return Err(FetchError::Transient("source disabled".into()));
        }

        let response = self.responses.lock().unwrap().get(key).cloned();
        response.unwrap_or(Err(FetchError::NotFound))
    }
}
