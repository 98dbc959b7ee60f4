use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::info;

use crate::article::Article;
use crate::cache::{CacheState, FeedCache};
use crate::fetcher::FeedFetcher;

/// Owns the configured feed sources and their cache, and merges them into
/// one newest-first article list.
pub struct Aggregator<F> {
    sources: RwLock<Vec<String>>,
    cache: FeedCache<F>,
}

impl<F: FeedFetcher> Aggregator<F> {
    pub fn new(fetcher: F, ttl: Duration, sources: Vec<String>) -> Self {
        Self {
            sources: RwLock::new(dedup_sources(sources)),
            cache: FeedCache::new(fetcher, ttl),
        }
    }

    pub fn cache(&self) -> &FeedCache<F> {
        &self.cache
    }

    pub async fn sources(&self) -> Vec<String> {
        self.sources.read().await.clone()
    }

    pub async fn source_states(&self) -> Vec<(String, CacheState)> {
        let sources = self.sources().await;
        let mut states = Vec::with_capacity(sources.len());
        for url in sources {
            let state = self.cache.state(&url).await;
            states.push((url, state));
        }
        states
    }

    /// Every configured source resolved concurrently, merged newest first.
    ///
    /// Equal dates keep source order then document order, whichever fetch
    /// finished first. Duplicates across sources are kept.
    pub async fn get_all(&self) -> Vec<Article> {
        let sources = self.sources().await;

        let per_source = join_all(sources.iter().map(|url| self.cache.get(url))).await;

        let mut articles: Vec<Article> = per_source.into_iter().flatten().collect();
        articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        articles
    }

    /// Case-insensitive substring match on title, description or any
    /// category. A blank keyword matches nothing.
    pub async fn search(&self, keyword: &str, limit: usize) -> Vec<Article> {
        let Some(needle) = normalize_query(keyword) else {
            return Vec::new();
        };

        self.get_all()
            .await
            .into_iter()
            .filter(|article| {
                article.title.to_lowercase().contains(&needle)
                    || article.description.to_lowercase().contains(&needle)
                    || matches_category(article, &needle)
            })
            .take(limit)
            .collect()
    }

    pub async fn by_category(&self, category: &str, limit: usize) -> Vec<Article> {
        let Some(needle) = normalize_query(category) else {
            return Vec::new();
        };

        self.get_all()
            .await
            .into_iter()
            .filter(|article| matches_category(article, &needle))
            .take(limit)
            .collect()
    }

    /// Replaces the source list. Sources that drop out lose their cache
    /// entry; sources that stay keep it.
    pub async fn set_sources(&self, urls: Vec<String>) {
        let urls = dedup_sources(urls);
        let removed: Vec<String> = {
            let mut sources = self.sources.write().await;
            let removed = sources
                .iter()
                .filter(|old| !urls.contains(old))
                .cloned()
                .collect();
            *sources = urls;
            removed
        };

        for url in &removed {
            self.cache.invalidate(url).await;
        }
        info!("Source list replaced ({} removed)", removed.len());
    }

    /// Returns false if the source was already configured.
    pub async fn add_source(&self, url: &str) -> bool {
        let mut sources = self.sources.write().await;
        if sources.iter().any(|s| s == url) {
            return false;
        }
        sources.push(url.to_string());
        info!("Added feed source {}", url);
        true
    }

    /// Returns false if the source was not configured.
    pub async fn remove_source(&self, url: &str) -> bool {
        let removed = {
            let mut sources = self.sources.write().await;
            let before = sources.len();
            sources.retain(|s| s != url);
            sources.len() != before
        };

        // Invalidated either way so a later re-add starts cold.
        self.cache.invalidate(url).await;
        if removed {
            info!("Removed feed source {}", url);
        }
        removed
    }

    /// Marks every cache entry stale; the next read refetches all sources
    /// and still falls back to the old articles if a fetch fails.
    pub async fn refresh(&self) {
        self.cache.expire_all().await;
    }
}

fn dedup_sources(urls: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        if !unique.contains(&url) {
            unique.push(url);
        }
    }
    unique
}

fn normalize_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn matches_category(article: &Article, needle: &str) -> bool {
    article
        .categories
        .iter()
        .any(|c| c.to_lowercase().contains(needle))
}

/// Re-reads every source on a fixed interval so requests hit a warm cache.
pub async fn start_background_refresh<F: FeedFetcher>(
    aggregator: Arc<Aggregator<F>>,
    interval: Duration,
) {
    info!("Starting initial feed fetch");
    let articles = aggregator.get_all().await;
    info!("Initial fetch produced {} articles", articles.len());

    if interval.is_zero() {
        info!("Background refresh disabled");
        return;
    }

    loop {
        tokio::time::sleep(interval).await;
        let articles = aggregator.get_all().await;
        info!("Scheduled refresh produced {} articles", articles.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::fetcher::stub::StubFetcher;

    const NEWS: &str = "https://school.example.com/news.rss";
    const SPORTS: &str = "https://school.example.com/sports.rss";

    fn feed(items: &[(&str, &str, &[&str])]) -> String {
        let items: String = items
            .iter()
            .map(|(title, date, categories)| {
                let categories: String = categories
                    .iter()
                    .map(|c| format!("<category>{}</category>", c))
                    .collect();
                format!(
                    "<item><title>{title}</title><guid>{title}</guid><description>About {title}</description><pubDate>{date}</pubDate>{categories}</item>"
                )
            })
            .collect();
        format!("<rss version=\"2.0\"><channel>{}</channel></rss>", items)
    }

    fn aggregator(sources: &[&str]) -> Aggregator<StubFetcher> {
        Aggregator::new(
            StubFetcher::default(),
            DEFAULT_TTL,
            sources.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn titles(articles: &[Article]) -> Vec<&str> {
        articles.iter().map(|a| a.title.as_str()).collect()
    }

    mod get_all_tests {
        use super::*;

        #[tokio::test]
        async fn test_no_sources() {
            let agg = aggregator(&[]);
            assert!(agg.get_all().await.is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_merge_order_independent_of_completion_order() {
            let agg = aggregator(&[NEWS, SPORTS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[("Older", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]));
            fetcher.respond(SPORTS, feed(&[("Newer", "Tue, 02 Jan 2024 00:00:00 GMT", &[])]));

            // Older source answers last
            fetcher.delay(NEWS, Duration::from_millis(500));
            assert_eq!(titles(&agg.get_all().await), vec!["Newer", "Older"]);

            agg.refresh().await;
            fetcher.delay(NEWS, Duration::ZERO);
            fetcher.delay(SPORTS, Duration::from_millis(500));
            assert_eq!(titles(&agg.get_all().await), vec!["Newer", "Older"]);
        }

        #[tokio::test(start_paused = true)]
        async fn test_sources_fetched_concurrently() {
            let agg = aggregator(&[NEWS, SPORTS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[("A", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]));
            fetcher.respond(SPORTS, feed(&[("B", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]));
            fetcher.delay(NEWS, Duration::from_secs(1));
            fetcher.delay(SPORTS, Duration::from_secs(1));

            let started = tokio::time::Instant::now();
            agg.get_all().await;
            assert!(started.elapsed() < Duration::from_millis(1500));
        }

        #[tokio::test]
        async fn test_ties_keep_source_then_document_order() {
            let date = "Mon, 01 Jan 2024 00:00:00 GMT";
            let agg = aggregator(&[NEWS, SPORTS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[("N1", date, &[]), ("N2", date, &[])]));
            fetcher.respond(SPORTS, feed(&[("S1", date, &[])]));

            assert_eq!(titles(&agg.get_all().await), vec!["N1", "N2", "S1"]);
        }

        #[tokio::test]
        async fn test_duplicates_across_sources_kept() {
            let body = feed(&[("Shared", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]);
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().respond(NEWS, body.clone());
            agg.cache().fetcher().respond(SPORTS, body);

            let articles = agg.get_all().await;
            assert_eq!(articles.len(), 2);
            assert_eq!(articles[0].id, articles[1].id);
        }

        #[tokio::test]
        async fn test_failing_source_does_not_hide_others() {
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().fail(NEWS, 500);
            agg.cache().fetcher().respond(
                SPORTS,
                feed(&[("Match", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]),
            );

            assert_eq!(titles(&agg.get_all().await), vec!["Match"]);
        }

        #[tokio::test]
        async fn test_second_call_within_ttl_uses_cache() {
            let agg = aggregator(&[NEWS]);
            agg.cache().fetcher().respond(
                NEWS,
                feed(&[
                    ("A", "Mon, 01 Jan 2024 00:00:00 GMT", &[]),
                    ("B", "Tue, 02 Jan 2024 00:00:00 GMT", &[]),
                    ("C", "Wed, 03 Jan 2024 00:00:00 GMT", &[]),
                ]),
            );

            let first = agg.get_all().await;
            let second = agg.get_all().await;

            assert_eq!(first.len(), 3);
            assert_eq!(first, second);
            assert_eq!(agg.cache().fetcher().calls(NEWS), 1);
        }
    }

    mod search_tests {
        use super::*;

        async fn populated() -> Aggregator<StubFetcher> {
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().respond(
                NEWS,
                feed(&[
                    ("Science Fair", "Mon, 01 Jan 2024 00:00:00 GMT", &["Events"]),
                    ("Library Hours", "Wed, 03 Jan 2024 00:00:00 GMT", &["Notices"]),
                    ("Robotics Club", "Fri, 05 Jan 2024 00:00:00 GMT", &["Science", "Clubs"]),
                ]),
            );
            agg.cache().fetcher().respond(
                SPORTS,
                feed(&[
                    ("Football Final", "Tue, 02 Jan 2024 00:00:00 GMT", &["Sports", "Events"]),
                    ("Swim Gala", "Thu, 04 Jan 2024 00:00:00 GMT", &["Sports"]),
                ]),
            );
            agg
        }

        #[tokio::test]
        async fn test_blank_keyword_matches_nothing() {
            let agg = populated().await;
            assert!(agg.search("", 10).await.is_empty());
            assert!(agg.search("  ", 10).await.is_empty());
            assert_eq!(agg.cache().fetcher().total_calls(), 0);
        }

        #[tokio::test]
        async fn test_search_title_description_and_category() {
            let agg = populated().await;

            // "science" hits a title and a category
            assert_eq!(
                titles(&agg.search("SCIENCE", 10).await),
                vec!["Robotics Club", "Science Fair"]
            );
            // description is "About <title>"
            assert_eq!(
                titles(&agg.search("about swim", 10).await),
                vec!["Swim Gala"]
            );
            assert_eq!(
                titles(&agg.search("notices", 10).await),
                vec!["Library Hours"]
            );
        }

        #[tokio::test]
        async fn test_search_trims_keyword() {
            let agg = populated().await;
            assert_eq!(titles(&agg.search("  gala ", 10).await), vec!["Swim Gala"]);
        }

        #[tokio::test]
        async fn test_search_limit_keeps_newest() {
            let agg = populated().await;
            assert_eq!(
                titles(&agg.search("about", 2).await),
                vec!["Robotics Club", "Swim Gala"]
            );
            assert!(agg.search("about", 0).await.is_empty());
        }

        #[tokio::test]
        async fn test_by_category() {
            let agg = populated().await;
            assert_eq!(
                titles(&agg.by_category("events", 10).await),
                vec!["Football Final", "Science Fair"]
            );
            assert_eq!(
                titles(&agg.by_category("sport", 1).await),
                vec!["Swim Gala"]
            );
        }

        #[tokio::test]
        async fn test_by_category_ignores_title() {
            let agg = populated().await;
            assert_eq!(
                titles(&agg.by_category("Library", 10).await),
                Vec::<&str>::new()
            );
            assert!(agg.by_category(" ", 10).await.is_empty());
        }
    }

    mod source_tests {
        use super::*;

        #[tokio::test]
        async fn test_new_dedups_sources() {
            let agg = aggregator(&[NEWS, SPORTS, NEWS]);
            assert_eq!(agg.sources().await, vec![NEWS, SPORTS]);
        }

        #[tokio::test]
        async fn test_add_source() {
            let agg = aggregator(&[NEWS]);
            assert!(agg.add_source(SPORTS).await);
            assert!(!agg.add_source(SPORTS).await);
            assert_eq!(agg.sources().await, vec![NEWS, SPORTS]);
        }

        #[tokio::test]
        async fn test_remove_source_invalidates_entry() {
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().respond(NEWS, feed(&[]));
            agg.cache().fetcher().respond(SPORTS, feed(&[]));
            agg.get_all().await;

            assert!(agg.remove_source(NEWS).await);
            assert!(!agg.remove_source(NEWS).await);
            assert_eq!(agg.sources().await, vec![SPORTS]);
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Unfetched);
            assert_eq!(agg.cache().state(SPORTS).await, CacheState::Fresh);
        }

        #[tokio::test]
        async fn test_removed_then_readded_source_is_cold() {
            let agg = aggregator(&[NEWS]);
            agg.cache().fetcher().respond(NEWS, feed(&[]));
            agg.get_all().await;

            agg.remove_source(NEWS).await;
            agg.add_source(NEWS).await;
            agg.get_all().await;

            assert_eq!(agg.cache().fetcher().calls(NEWS), 2);
        }

        #[tokio::test]
        async fn test_set_sources_invalidates_only_removed() {
            let third = "https://school.example.com/arts.rss";
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().respond(NEWS, feed(&[]));
            agg.cache().fetcher().respond(SPORTS, feed(&[]));
            agg.get_all().await;

            agg.set_sources(vec![SPORTS.to_string(), third.to_string(), SPORTS.to_string()])
                .await;

            assert_eq!(agg.sources().await, vec![SPORTS, third]);
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Unfetched);
            assert_eq!(agg.cache().state(SPORTS).await, CacheState::Fresh);
        }

        #[tokio::test]
        async fn test_source_states() {
            let agg = aggregator(&[NEWS, SPORTS]);
            agg.cache().fetcher().respond(NEWS, feed(&[]));
            agg.cache().get(NEWS).await;

            assert_eq!(
                agg.source_states().await,
                vec![
                    (NEWS.to_string(), CacheState::Fresh),
                    (SPORTS.to_string(), CacheState::Unfetched),
                ]
            );
        }

        #[tokio::test]
        async fn test_refresh_forces_refetch() {
            let agg = aggregator(&[NEWS]);
            agg.cache().fetcher().respond(NEWS, feed(&[]));
            agg.get_all().await;

            agg.refresh().await;
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Stale);

            agg.get_all().await;
            assert_eq!(agg.cache().fetcher().calls(NEWS), 2);
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Fresh);
        }

        #[tokio::test]
        async fn test_refresh_keeps_fallback_when_fetch_fails() {
            let agg = aggregator(&[NEWS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[("Assembly", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]));
            agg.get_all().await;

            agg.refresh().await;
            fetcher.fail(NEWS, 503);

            assert_eq!(titles(&agg.get_all().await), vec!["Assembly"]);
            assert_eq!(fetcher.calls(NEWS), 2);
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Stale);
        }

        #[tokio::test(start_paused = true)]
        async fn test_source_removed_mid_fetch_stays_uncached() {
            let agg = aggregator(&[NEWS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[("Assembly", "Mon, 01 Jan 2024 00:00:00 GMT", &[])]));
            fetcher.delay(NEWS, Duration::from_secs(1));

            let (articles, removed) = tokio::join!(agg.get_all(), async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                agg.remove_source(NEWS).await
            });

            // The caller still gets what it fetched
            assert_eq!(titles(&articles), vec!["Assembly"]);
            assert!(removed);
            assert_eq!(agg.cache().state(NEWS).await, CacheState::Unfetched);
            assert!(agg.cache().is_empty().await);

            fetcher.delay(NEWS, Duration::ZERO);
            agg.add_source(NEWS).await;
            agg.get_all().await;
            assert_eq!(fetcher.calls(NEWS), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_source_replaced_mid_fetch_stays_uncached() {
            let agg = aggregator(&[NEWS, SPORTS]);
            let fetcher = agg.cache().fetcher();
            fetcher.respond(NEWS, feed(&[]));
            fetcher.respond(SPORTS, feed(&[]));
            fetcher.delay(NEWS, Duration::from_secs(1));

            tokio::join!(agg.get_all(), async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                agg.set_sources(vec![SPORTS.to_string()]).await;
            });

            assert_eq!(agg.cache().state(NEWS).await, CacheState::Unfetched);
            assert_eq!(agg.cache().state(SPORTS).await, CacheState::Fresh);
        }
    }
}
