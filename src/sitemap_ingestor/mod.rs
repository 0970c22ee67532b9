//! Periodic and on-demand sitemap ingestion, draining sitemaps discovered
//! via `RobotsCache::sitemaps_for` (and seeded directly from config) into
//! the frontier at boosted priority (spec.md §4.9).
//!
//! XML parsing uses `quick-xml`'s pull-style `Reader`, the same low-level
//! streaming approach the teacher applies to its own structured-document
//! parsing — no DOM tree is built, matching spec.md §9's "no regex engine
//! is part of the core" design note extended to XML.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::frontier::Frontier;
use crate::http_client::Downloader;
use crate::metrics::Metrics;
use crate::model::UrlRecord;
use crate::robots_cache::RobotsCache;
use crate::shutdown::ShutdownSignal;
use crate::utils::constants::{DEFAULT_SITEMAP_PARSE_INTERVAL_HOURS, ROBOTS_FETCH_TIMEOUT};

/// State tracked per known sitemap URL (spec.md §4.9).
#[derive(Debug, Clone)]
struct SitemapState {
    parse_interval_hours: u32,
    consecutive_failures: u32,
    next_due: std::time::Instant,
}

impl SitemapState {
    fn new(parse_interval_hours: u32) -> Self {
        Self {
            parse_interval_hours,
            consecutive_failures: 0,
            next_due: std::time::Instant::now(),
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_due = std::time::Instant::now() + Duration::from_secs(u64::from(self.parse_interval_hours) * 3600);
    }

    fn on_failure(&mut self) {
        self.consecutive_failures = (self.consecutive_failures + 1).min(6);
        let backoff_hours = u64::from(self.parse_interval_hours) * (1u64 << self.consecutive_failures);
        self.next_due = std::time::Instant::now() + Duration::from_secs(backoff_hours * 3600);
    }
}

/// Ingests `<urlset>` and `<sitemapindex>` documents on a per-sitemap
/// cadence, feeding fresh URLs into the `Frontier` (spec.md §4.9).
pub struct SitemapIngestor {
    downloader: Arc<dyn Downloader>,
    robots: Arc<RobotsCache>,
    frontier: Arc<Frontier>,
    metrics: Arc<Metrics>,
    known: Mutex<std::collections::HashMap<String, SitemapState>>,
    seen_urls: Mutex<HashSet<String>>,
    poll_interval: Duration,
}

impl SitemapIngestor {
    #[must_use]
    pub fn new(
        downloader: Arc<dyn Downloader>,
        robots: Arc<RobotsCache>,
        frontier: Arc<Frontier>,
        metrics: Arc<Metrics>,
        seed_sitemaps: &[(String, f32)],
        poll_interval: Duration,
    ) -> Self {
        let mut known = std::collections::HashMap::new();
        for (url, _priority) in seed_sitemaps {
            known.insert(url.clone(), SitemapState::new(DEFAULT_SITEMAP_PARSE_INTERVAL_HOURS));
        }
        Self {
            downloader,
            robots,
            frontier,
            metrics,
            known: Mutex::new(known),
            seen_urls: Mutex::new(HashSet::new()),
            poll_interval,
        }
    }

    /// Background task: on the configured cadence, pulls newly discovered
    /// sitemaps out of `RobotsCache` for every origin seen so far, then
    /// ingests every sitemap that is currently due.
    pub async fn run(self: Arc<Self>, origins: Arc<Mutex<HashSet<String>>>, shutdown: Arc<ShutdownSignal>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = interval.tick() => {}
            }

            self.absorb_robots_sitemaps(&origins);
            self.ingest_due().await;
        }
    }

    fn absorb_robots_sitemaps(&self, origins: &Arc<Mutex<HashSet<String>>>) {
        let origins: Vec<String> = origins.lock().iter().cloned().collect();
        let mut known = self.known.lock();
        for origin in origins {
            for (sitemap_url, _hint) in self.robots.sitemaps_for(&origin) {
                known.entry(sitemap_url).or_insert_with(|| SitemapState::new(DEFAULT_SITEMAP_PARSE_INTERVAL_HOURS));
            }
        }
    }

    async fn ingest_due(&self) {
        let due: Vec<String> = {
            let known = self.known.lock();
            let now = std::time::Instant::now();
            known
                .iter()
                .filter(|(_, state)| state.next_due <= now)
                .map(|(url, _)| url.clone())
                .collect()
        };

        for url in due {
            self.ingest_one(&url).await;
        }
    }

    /// Fetches and parses one sitemap URL. A `<sitemapindex>` enqueues its
    /// children for future ingestion (inheriting the parent's cadence); a
    /// `<urlset>` feeds fresh URLs into the frontier (spec.md §4.9).
    async fn ingest_one(&self, url: &str) {
        let response = match self.downloader.get(url, ROBOTS_FETCH_TIMEOUT).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("sitemap ingest: fetch failed for {url}: {e}");
                self.mark_failure(url);
                return;
            }
        };
        if response.status != 200 {
            self.mark_failure(url);
            return;
        }

        match parse_sitemap(&response.body) {
            Some(ParsedSitemap::Index(children)) => {
                let parent_interval = self
                    .known
                    .lock()
                    .get(url)
                    .map(|s| s.parse_interval_hours)
                    .unwrap_or(DEFAULT_SITEMAP_PARSE_INTERVAL_HOURS);
                let mut known = self.known.lock();
                for child in children {
                    known.entry(child).or_insert_with(|| SitemapState::new(parent_interval));
                }
                self.mark_success(url);
            }
            Some(ParsedSitemap::UrlSet(entries)) => {
                self.feed_entries(entries);
                self.mark_success(url);
            }
            None => {
                log::warn!("sitemap ingest: malformed XML at {url}");
                self.metrics.record_failure(crate::error::FailureClass::Parse);
                self.mark_failure(url);
            }
        }
    }

    fn feed_entries(&self, entries: Vec<SitemapEntry>) {
        let mut seen = self.seen_urls.lock();
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            if seen.insert(entry.loc.clone()) {
                fresh.push(UrlRecord::new(entry.loc, entry.priority, 0, String::new()));
            }
        }
        drop(seen);
        if !fresh.is_empty() {
            self.metrics.links_discovered.fetch_add(fresh.len() as u64, Ordering::Relaxed);
            self.frontier.enqueue_bulk(fresh);
        }
    }

    fn mark_success(&self, url: &str) {
        if let Some(state) = self.known.lock().get_mut(url) {
            state.on_success();
        }
    }

    fn mark_failure(&self, url: &str) {
        if let Some(state) = self.known.lock().get_mut(url) {
            state.on_failure();
        }
    }
}

struct SitemapEntry {
    loc: String,
    priority: f32,
}

enum ParsedSitemap {
    Index(Vec<String>),
    UrlSet(Vec<SitemapEntry>),
}

/// Maps `<changefreq>` to a priority hint (spec.md §4.9).
fn changefreq_priority(changefreq: &str) -> f32 {
    match changefreq {
        "always" => 1.0,
        "hourly" => 0.9,
        "daily" => 0.8,
        "weekly" => 0.6,
        "monthly" => 0.4,
        "yearly" => 0.2,
        "never" => 0.1,
        _ => 0.5,
    }
}

/// Parses either a `<sitemapindex>` or a `<urlset>` document. Returns
/// `None` on malformed or empty XML (spec.md §4.9 "handled as a failure
/// with no crash").
fn parse_sitemap(body: &[u8]) -> Option<ParsedSitemap> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut is_index = false;
    let mut is_urlset = false;

    let mut index_children = Vec::new();
    let mut url_entries = Vec::new();

    let mut current_tag: Option<String> = None;
    let mut current_loc: Option<String> = None;
    let mut current_changefreq: Option<String> = None;
    let mut current_priority: Option<f32> = None;
    let mut in_sitemap_or_url = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "sitemapindex" => is_index = true,
                    "urlset" => is_urlset = true,
                    "sitemap" | "url" => {
                        in_sitemap_or_url = true;
                        current_loc = None;
                        current_changefreq = None;
                        current_priority = None;
                    }
                    "loc" | "changefreq" | "priority" | "lastmod" if in_sitemap_or_url => {
                        current_tag = Some(name);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    let text = t.unescape().unwrap_or_default().trim().to_string();
                    match tag.as_str() {
                        "loc" => current_loc = Some(text),
                        "changefreq" => current_changefreq = Some(text),
                        "priority" => current_priority = text.parse::<f32>().ok(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "sitemap" if is_index => {
                        if let Some(loc) = current_loc.take() {
                            index_children.push(loc);
                        }
                        in_sitemap_or_url = false;
                    }
                    "url" if is_urlset => {
                        if let Some(loc) = current_loc.take() {
                            let priority = current_priority
                                .unwrap_or_else(|| current_changefreq.as_deref().map(changefreq_priority).unwrap_or(0.5))
                                .clamp(0.0, 1.0);
                            url_entries.push(SitemapEntry { loc, priority });
                        }
                        in_sitemap_or_url = false;
                    }
                    "loc" | "changefreq" | "priority" | "lastmod" => current_tag = None,
                    _ => {}
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("sitemap ingest: XML parse error: {e}");
                break;
            }
        }
        buf.clear();
    }

    if is_index {
        Some(ParsedSitemap::Index(index_children))
    } else if is_urlset {
        Some(ParsedSitemap::UrlSet(url_entries))
    } else {
        None
    }
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::http_client::DownloadResponse;
    use async_trait::async_trait;

    struct FixedDownloader {
        responses: std::collections::HashMap<String, (u16, &'static str)>,
    }

    #[async_trait]
    impl Downloader for FixedDownloader {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<DownloadResponse> {
            let (status, body) = self.responses.get(url).copied().unwrap_or((404, ""));
            Ok(DownloadResponse { status, body: body.as_bytes().to_vec() })
        }
    }

    fn robots_cache() -> Arc<RobotsCache> {
        struct NeverDownloader;
        #[async_trait]
        impl Downloader for NeverDownloader {
            async fn get(&self, _url: &str, _timeout: Duration) -> Result<DownloadResponse> {
                Ok(DownloadResponse { status: 404, body: Vec::new() })
            }
        }
        Arc::new(RobotsCache::new(Arc::new(NeverDownloader), "TestBot".into(), Duration::from_millis(200), 10))
    }

    #[test]
    fn parses_urlset_with_changefreq_priority() {
        let xml = br#"<?xml version="1.0"?>
            <urlset><url><loc>https://a.test/1</loc><changefreq>daily</changefreq></url>
            <url><loc>https://a.test/2</loc><priority>0.3</priority></url></urlset>"#;
        match parse_sitemap(xml).unwrap() {
            ParsedSitemap::UrlSet(entries) => {
                assert_eq!(entries.len(), 2);
                assert!((entries[0].priority - 0.8).abs() < 1e-6);
                assert!((entries[1].priority - 0.3).abs() < 1e-6);
            }
            _ => panic!("expected urlset"),
        }
    }

    #[test]
    fn parses_sitemap_index_children() {
        let xml = br#"<sitemapindex>
            <sitemap><loc>https://a.test/s1.xml</loc></sitemap>
            <sitemap><loc>https://a.test/s2.xml</loc></sitemap>
        </sitemapindex>"#;
        match parse_sitemap(xml).unwrap() {
            ParsedSitemap::Index(children) => assert_eq!(children, vec!["https://a.test/s1.xml", "https://a.test/s2.xml"]),
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn malformed_xml_returns_none_not_crash() {
        assert!(parse_sitemap(b"not xml at all").is_none());
        assert!(parse_sitemap(b"").is_none());
    }

    #[tokio::test]
    async fn ingest_index_enqueues_children_then_drains_urlset_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let spill = Arc::new(crate::spill_queue::SpillQueue::open(dir.path(), 4).unwrap());
        let metrics = Arc::new(Metrics::default());
        let frontier = Arc::new(Frontier::new(spill, 10_000, 100, 100, 10, metrics.clone()));

        let mut responses = std::collections::HashMap::new();
        responses.insert(
            "https://site.example/sitemap_index.xml".to_string(),
            (200, r#"<sitemapindex><sitemap><loc>https://site.example/sitemap-a.xml</loc></sitemap><sitemap><loc>https://site.example/sitemap-b.xml</loc></sitemap></sitemapindex>"#),
        );
        let urls_a: String = (0..10).map(|i| format!("<url><loc>https://site.example/a{i}</loc><changefreq>daily</changefreq></url>")).collect();
        let urls_b: String = (0..10).map(|i| format!("<url><loc>https://site.example/b{i}</loc><changefreq>daily</changefreq></url>")).collect();
        let body_a = format!("<urlset>{urls_a}</urlset>");
        let body_b = format!("<urlset>{urls_b}</urlset>");

        let downloader = Arc::new(FixedDownloaderLeaked {
            index_body: r#"<sitemapindex><sitemap><loc>https://site.example/sitemap-a.xml</loc></sitemap><sitemap><loc>https://site.example/sitemap-b.xml</loc></sitemap></sitemapindex>"#.to_string(),
            a_body: body_a,
            b_body: body_b,
        });

        let ingestor = Arc::new(SitemapIngestor::new(
            downloader,
            robots_cache(),
            frontier.clone(),
            metrics,
            &[("https://site.example/sitemap_index.xml".to_string(), 0.5)],
            Duration::from_secs(3600),
        ));

        ingestor.ingest_one("https://site.example/sitemap_index.xml").await;
        ingestor.ingest_due().await;
        ingestor.ingest_due().await; // second cycle: nothing due yet, no duplicates

        assert_eq!(frontier.len(), 20);
    }

    struct FixedDownloaderLeaked {
        index_body: String,
        a_body: String,
        b_body: String,
    }

    #[async_trait]
    impl Downloader for FixedDownloaderLeaked {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<DownloadResponse> {
            let body = if url.ends_with("sitemap_index.xml") {
                &self.index_body
            } else if url.ends_with("sitemap-a.xml") {
                &self.a_body
            } else {
                &self.b_body
            };
            Ok(DownloadResponse { status: 200, body: body.as_bytes().to_vec() })
        }
    }
}
