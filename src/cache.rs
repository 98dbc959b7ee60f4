use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::article::Article;
use crate::fetcher::FeedFetcher;
use crate::parser::parse_items;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub articles: Vec<Article>,
    pub fetched_at: Instant,
    /// Set by an explicit refresh; the entry reads as stale regardless of age
    pub expired: bool,
}

impl CacheEntry {
    fn new(articles: Vec<Article>) -> Self {
        Self {
            articles,
            fetched_at: Instant::now(),
            expired: false,
        }
    }

    /// An entry exactly `ttl` old is already stale.
    pub fn is_stale_at(&self, now: Instant, ttl: Duration) -> bool {
        self.expired || now.saturating_duration_since(self.fetched_at) >= ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Unfetched,
    Fresh,
    Stale,
}

/// Entries plus the invalidation counters that guard in-flight fetches.
#[derive(Default)]
struct Entries {
    map: HashMap<String, CacheEntry>,
    /// Bumped per URL by `invalidate`
    generations: HashMap<String, u64>,
    /// Bumped by `invalidate_all`
    epoch: u64,
}

impl Entries {
    fn version(&self, url: &str) -> (u64, u64) {
        (self.epoch, self.generations.get(url).copied().unwrap_or(0))
    }
}

/// Parsed articles per feed URL with a time-to-live.
///
/// Stale entries are never evicted on their own: they are kept to be
/// served when a refresh fails. Fetch and parse failures never reach the
/// caller, only the log. A fetch that completes after its URL was
/// invalidated is returned to its caller but not stored.
pub struct FeedCache<F> {
    fetcher: F,
    ttl: Duration,
    entries: RwLock<Entries>,
}

impl<F: FeedFetcher> FeedCache<F> {
    pub fn new(fetcher: F, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, url: &str) -> Vec<Article> {
        // The lock is released before fetching so other sources proceed.
        let (stale, version) = {
            let entries = self.entries.read().await;
            match entries.map.get(url) {
                Some(entry) if !entry.is_stale_at(Instant::now(), self.ttl) => {
                    debug!("Cache hit for {}", url);
                    return entry.articles.clone();
                }
                Some(entry) => (Some(entry.articles.clone()), entries.version(url)),
                None => (None, entries.version(url)),
            }
        };

        match self.fetcher.fetch(url).await {
            Ok(body) => {
                let articles = Self::parse_articles(url, &body);

                let mut entries = self.entries.write().await;
                if entries.version(url) == version {
                    info!("Cached {} articles for {}", articles.len(), url);
                    entries
                        .map
                        .insert(url.to_string(), CacheEntry::new(articles.clone()));
                } else {
                    debug!("Discarding fetch of {}: invalidated while in flight", url);
                }
                articles
            }
            Err(e) => match stale {
                Some(articles) => {
                    warn!(
                        "Failed to fetch feed '{}': {}; serving {} expired articles",
                        url,
                        e,
                        articles.len()
                    );
                    articles
                }
                None => {
                    warn!("Failed to fetch feed '{}': {}", url, e);
                    Vec::new()
                }
            },
        }
    }

    /// A malformed document yields no articles; that empty result is
    /// cached like any other until the TTL runs out.
    fn parse_articles(url: &str, body: &str) -> Vec<Article> {
        match parse_items(body) {
            Ok(items) => {
                let now = Utc::now();
                items
                    .into_iter()
                    .map(|item| Article::from_raw(item, url, now))
                    .collect()
            }
            Err(e) => {
                error!("Failed to parse feed '{}': {}", url, e);
                Vec::new()
            }
        }
    }

    pub async fn state(&self, url: &str) -> CacheState {
        match self.entries.read().await.map.get(url) {
            None => CacheState::Unfetched,
            Some(entry) if entry.is_stale_at(Instant::now(), self.ttl) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }

    /// Marks every entry stale but keeps its articles as a fallback.
    pub async fn expire_all(&self) {
        let mut entries = self.entries.write().await;
        info!("Expiring {} cached feeds", entries.map.len());
        for entry in entries.map.values_mut() {
            entry.expired = true;
        }
    }

    /// Forgets `url` entirely: the next read is cold and has no fallback.
    pub async fn invalidate(&self, url: &str) {
        let mut entries = self.entries.write().await;
        *entries.generations.entry(url.to_string()).or_default() += 1;
        if entries.map.remove(url).is_some() {
            debug!("Invalidated cache for {}", url);
        }
    }

    /// Forgets every entry. Also the teardown for a cache being dropped.
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        info!("Invalidating {} cached feeds", entries.map.len());
        entries.map.clear();
        entries.generations.clear();
        entries.epoch += 1;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }
}
