//! Periodic RSS/Atom feed polling, feeding fresh entries into the frontier
//! at a fixed priority (spec.md §4.10).
//!
//! Parsing is delegated to `feed-rs`, which normalises both RSS 2.0 and
//! Atom into one `feed_rs::model::Feed` shape — there is no bespoke XML
//! walk here the way `sitemap_ingestor` has one, since sitemaps are a
//! single custom schema but feeds are two standards worth reusing a
//! dedicated parser for.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::frontier::Frontier;
use crate::http_client::Downloader;
use crate::metrics::Metrics;
use crate::model::UrlRecord;
use crate::shutdown::ShutdownSignal;
use crate::utils::constants::{
    DEFAULT_FEED_POLL_INTERVAL_MINUTES, FEED_FRESHNESS_WINDOW, FEED_URL_PRIORITY,
    MAX_FEED_CONSECUTIVE_FAILURES, MAX_FEED_POLL_INTERVAL_MINUTES,
};

/// Per-feed polling state (spec.md §4.10 "FeedState").
#[derive(Debug, Clone)]
struct FeedState {
    poll_interval_minutes: u32,
    consecutive_failures: u32,
    next_poll_time: std::time::Instant,
    enabled: bool,
}

impl FeedState {
    fn new(poll_interval_minutes: u32) -> Self {
        Self {
            poll_interval_minutes,
            consecutive_failures: 0,
            next_poll_time: std::time::Instant::now(),
            enabled: true,
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_poll_time = std::time::Instant::now() + Duration::from_secs(u64::from(self.poll_interval_minutes) * 60);
    }

    fn on_failure(&mut self) {
        self.consecutive_failures = (self.consecutive_failures + 1).min(MAX_FEED_CONSECUTIVE_FAILURES);
        let backoff_minutes = (u64::from(self.poll_interval_minutes) * (1u64 << self.consecutive_failures))
            .min(u64::from(MAX_FEED_POLL_INTERVAL_MINUTES));
        self.next_poll_time = std::time::Instant::now() + Duration::from_secs(backoff_minutes * 60);
    }
}

struct FeedEntry {
    url: String,
    published: Option<SystemTime>,
}

/// Polls configured RSS/Atom feeds on a per-feed cadence, enqueuing
/// fresh entries (spec.md §4.10).
pub struct FeedIngestor {
    downloader: Arc<dyn Downloader>,
    frontier: Arc<Frontier>,
    metrics: Arc<Metrics>,
    feeds: Mutex<std::collections::HashMap<String, FeedState>>,
    seen_urls: Mutex<HashSet<String>>,
    poll_interval: Duration,
}

impl FeedIngestor {
    #[must_use]
    pub fn new(downloader: Arc<dyn Downloader>, frontier: Arc<Frontier>, metrics: Arc<Metrics>, feed_urls: &[String], poll_interval: Duration) -> Self {
        let mut feeds = std::collections::HashMap::new();
        for url in feed_urls {
            feeds.insert(url.clone(), FeedState::new(DEFAULT_FEED_POLL_INTERVAL_MINUTES));
        }
        Self {
            downloader,
            frontier,
            metrics,
            feeds: Mutex::new(feeds),
            seen_urls: Mutex::new(HashSet::new()),
            poll_interval,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: Arc<ShutdownSignal>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = interval.tick() => {}
            }
            self.poll_due().await;
        }
    }

    async fn poll_due(&self) {
        let due: Vec<String> = {
            let feeds = self.feeds.lock();
            let now = std::time::Instant::now();
            feeds
                .iter()
                .filter(|(_, state)| state.enabled && state.next_poll_time <= now)
                .map(|(url, _)| url.clone())
                .collect()
        };

        for url in due {
            self.poll_one(&url).await;
        }
    }

    async fn poll_one(&self, url: &str) {
        let response = match self.downloader.get(url, crate::utils::constants::ROBOTS_FETCH_TIMEOUT).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("feed ingest: fetch failed for {url}: {e}");
                self.mark_failure(url);
                return;
            }
        };
        if response.status != 200 {
            self.mark_failure(url);
            return;
        }

        match feed_rs::parser::parse(response.body.as_slice()) {
            Ok(feed) => {
                let entries = fresh_entries(&feed);
                self.feed_entries(entries);
                self.mark_success(url);
            }
            Err(e) => {
                log::warn!("feed ingest: malformed feed at {url}: {e}");
                self.metrics.record_failure(crate::error::FailureClass::Parse);
                self.mark_failure(url);
            }
        }
    }

    fn feed_entries(&self, entries: Vec<FeedEntry>) {
        let now = SystemTime::now();
        let mut seen = self.seen_urls.lock();
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            let within_window = entry
                .published
                .map(|p| now.duration_since(p).map(|age| age <= FEED_FRESHNESS_WINDOW).unwrap_or(true))
                .unwrap_or(true);
            if !within_window {
                continue;
            }
            if seen.insert(entry.url.clone()) {
                fresh.push(UrlRecord::new(entry.url, FEED_URL_PRIORITY, 0, String::new()));
            }
        }
        drop(seen);
        if !fresh.is_empty() {
            self.metrics.links_discovered.fetch_add(fresh.len() as u64, Ordering::Relaxed);
            self.frontier.enqueue_bulk(fresh);
        }
    }

    fn mark_success(&self, url: &str) {
        if let Some(state) = self.feeds.lock().get_mut(url) {
            state.on_success();
        }
    }

    fn mark_failure(&self, url: &str) {
        if let Some(state) = self.feeds.lock().get_mut(url) {
            state.on_failure();
            if state.consecutive_failures >= MAX_FEED_CONSECUTIVE_FAILURES {
                state.enabled = false;
                log::warn!("feed ingest: disabling feed after repeated failures: {url}");
            }
        }
    }
}

/// Flattens a parsed RSS/Atom feed into `(link, published)` pairs. Entries
/// without a resolvable link are discarded; a missing publish date is
/// treated as "now" so the entry still clears the freshness window
/// (spec.md §4.10 "default to now if unparsable").
fn fresh_entries(feed: &feed_rs::model::Feed) -> Vec<FeedEntry> {
    feed.entries
        .iter()
        .filter_map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone())?;
            let published = entry.published.or(entry.updated).map(|dt| {
                SystemTime::UNIX_EPOCH + Duration::from_secs(dt.timestamp().max(0) as u64)
            });
            Some(FeedEntry { url: link, published })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::http_client::DownloadResponse;
    use async_trait::async_trait;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Feed</title>
<item><title>One</title><link>https://news.example/1</link><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
<item><title>Two</title><link>https://news.example/2</link><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
</channel></rss>"#;

    struct FixedDownloader {
        body: &'static str,
    }

    #[async_trait]
    impl Downloader for FixedDownloader {
        async fn get(&self, _url: &str, _timeout: Duration) -> Result<DownloadResponse> {
            Ok(DownloadResponse { status: 200, body: self.body.as_bytes().to_vec() })
        }
    }

    fn frontier() -> Arc<Frontier> {
        let dir = tempfile::tempdir().unwrap();
        let spill = Arc::new(crate::spill_queue::SpillQueue::open(dir.path(), 4).unwrap());
        Arc::new(Frontier::new(spill, 10_000, 100, 100, 10, Arc::new(Metrics::default())))
    }

    #[test]
    fn rss_entries_with_old_pubdate_are_filtered_by_freshness() {
        let feed = feed_rs::parser::parse(RSS_SAMPLE.as_bytes()).unwrap();
        let entries = fresh_entries(&feed);
        assert_eq!(entries.len(), 2);
        // Both entries are from 2024, well outside a 48h freshness window
        // relative to "now" in this test environment — the window check
        // itself is exercised via feed_entries below.
        assert!(entries[0].published.is_some());
    }

    #[tokio::test]
    async fn stale_entries_are_not_enqueued() {
        let frontier = frontier();
        let metrics = Arc::new(Metrics::default());
        let downloader = Arc::new(FixedDownloader { body: RSS_SAMPLE });
        let ingestor = Arc::new(FeedIngestor::new(
            downloader,
            frontier.clone(),
            metrics,
            &["https://news.example/feed.xml".to_string()],
            Duration::from_secs(3600),
        ));
        ingestor.poll_one("https://news.example/feed.xml").await;
        assert_eq!(frontier.len(), 0);
    }

    #[tokio::test]
    async fn malformed_feed_marks_failure_without_crash() {
        let frontier = frontier();
        let metrics = Arc::new(Metrics::default());
        let downloader = Arc::new(FixedDownloader { body: "not a feed" });
        let ingestor = Arc::new(FeedIngestor::new(
            downloader,
            frontier,
            metrics,
            &["https://news.example/feed.xml".to_string()],
            Duration::from_secs(3600),
        ));
        ingestor.poll_one("https://news.example/feed.xml").await;
        let failures = ingestor.feeds.lock().get("https://news.example/feed.xml").unwrap().consecutive_failures;
        assert_eq!(failures, 1);
    }
}
