//! Per-origin robots.txt fetch/parse/cache, surfacing allow-checks and
//! discovered sitemaps (spec.md §4.4).
//!
//! Origin state is cached in an LRU bounded by entry count (spec.md §4.4
//! "stored in an LRU cache bounded by count and memory"), reusing the
//! teacher's dependency on `lru`. Allow/Deny evaluation delegates to the
//! `robotstxt` crate's RFC-9309-oriented matcher; crawl-delay and sitemap
//! discovery are extracted with a bounded per-line scan, matching spec.md
//! §9's "no regex engine is part of the core" design note.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use robotstxt::DefaultMatcher;

use crate::http_client::Downloader;
use crate::model::RobotsRecord;
use crate::utils::constants::{ROBOTS_DEFAULT_TTL, ROBOTS_FETCH_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowDecision {
    Allow,
    Deny,
    /// Absent or expired cache entry; a fetch has been scheduled. Callers
    /// must treat this as "do not crawl yet" (spec.md §4.4).
    Unknown,
}

struct OriginEntry {
    record: Option<RobotsRecord>,
    fetching: AtomicBool,
}

impl OriginEntry {
    fn empty() -> Self {
        Self {
            record: None,
            fetching: AtomicBool::new(false),
        }
    }
}

pub struct RobotsCache {
    cache: Mutex<LruCache<String, Arc<Mutex<OriginEntry>>>>,
    downloader: Arc<dyn Downloader>,
    user_agent: String,
    default_min_interval: Duration,
}

impl RobotsCache {
    #[must_use]
    pub fn new(downloader: Arc<dyn Downloader>, user_agent: String, default_min_interval: Duration, capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::new(1024).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            downloader,
            user_agent,
            default_min_interval,
        }
    }

    fn origin_entry(&self, origin: &str) -> Arc<Mutex<OriginEntry>> {
        let mut cache = self.cache.lock();
        cache
            .get_or_insert(origin.to_string(), || Arc::new(Mutex::new(OriginEntry::empty())))
            .clone()
    }

    /// Returns the allow/deny/unknown decision for `path` under `origin`
    /// (e.g. `https://example.org`), scheduling a background fetch when the
    /// cached record is missing or expired (spec.md §4.4 `is_allowed`).
    pub async fn is_allowed(&self, origin: &str, path: &str) -> AllowDecision {
        let entry = self.origin_entry(origin);

        let needs_fetch = {
            let guard = entry.lock();
            match &guard.record {
                Some(record) if !record.is_expired() => None,
                _ => Some(()),
            }
        };

        if needs_fetch.is_none() {
            let guard = entry.lock();
            let record = guard.record.as_ref().expect("checked Some above");
            return self.evaluate(record, path);
        }

        let already_fetching = entry.lock().fetching.swap(true, Ordering::AcqRel);
        if !already_fetching {
            let downloader = Arc::clone(&self.downloader);
            let user_agent = self.user_agent.clone();
            let origin = origin.to_string();
            let entry = Arc::clone(&entry);
            tokio::spawn(async move {
                refresh(downloader, user_agent, origin, entry).await;
            });
        }

        AllowDecision::Unknown
    }

    fn evaluate(&self, record: &RobotsRecord, path: &str) -> AllowDecision {
        if record.raw.is_empty() {
            return AllowDecision::Allow;
        }
        let mut matcher = DefaultMatcher::default();
        let url = format!("https://placeholder.invalid{path}");
        if matcher.one_agent_allowed_by_robots(&record.raw, &self.user_agent, &url) {
            AllowDecision::Allow
        } else {
            AllowDecision::Deny
        }
    }

    /// The crawl-delay parsed from robots.txt, or the system default
    /// (spec.md §4.4 `crawl_delay`).
    #[must_use]
    pub fn crawl_delay(&self, origin: &str) -> Duration {
        let entry = self.origin_entry(origin);
        let guard = entry.lock();
        guard
            .record
            .as_ref()
            .and_then(|r| r.crawl_delay)
            .unwrap_or(self.default_min_interval)
    }

    /// Sitemaps discovered in this origin's robots.txt (spec.md §4.4
    /// `sitemaps_for`).
    #[must_use]
    pub fn sitemaps_for(&self, origin: &str) -> Vec<(String, f32)> {
        let entry = self.origin_entry(origin);
        let guard = entry.lock();
        guard.record.as_ref().map(|r| r.sitemaps.clone()).unwrap_or_default()
    }

    /// Forces the next `is_allowed` to refetch (spec.md §4.4 `invalidate`).
    pub fn invalidate(&self, origin: &str) {
        let entry = self.origin_entry(origin);
        entry.lock().record = None;
    }
}

async fn refresh(
    downloader: Arc<dyn Downloader>,
    user_agent: String,
    origin: String,
    entry: Arc<Mutex<OriginEntry>>,
) {
    let robots_url = format!("{origin}/robots.txt");
    let record = match downloader.get(&robots_url, ROBOTS_FETCH_TIMEOUT).await {
        Ok(response) if response.status == 200 => {
            let raw = String::from_utf8_lossy(&response.body).to_string();
            parse_robots(&raw, &user_agent, ROBOTS_DEFAULT_TTL)
        }
        Ok(response) if response.status == 404 || response.status == 403 => {
            RobotsRecord::allow_all(ROBOTS_DEFAULT_TTL)
        }
        Ok(_) | Err(_) => RobotsRecord::allow_all(Duration::from_secs(300)),
    };

    let mut guard = entry.lock();
    guard.record = Some(record);
    guard.fetching.store(false, Ordering::Release);
    log::debug!("robots.txt refreshed for {origin}");
}

/// Parses robots.txt for crawl-delay and sitemap directives with a bounded
/// per-line scan; allow/deny matching itself is delegated to `robotstxt`
/// at evaluation time rather than pre-compiled here.
fn parse_robots(raw: &str, user_agent: &str, ttl: Duration) -> RobotsRecord {
    let mut crawl_delay = None;
    let mut sitemaps = Vec::new();
    let mut in_relevant_group = false;
    let ua_token = user_agent.split('/').next().unwrap_or(user_agent).to_lowercase();

    for line in raw.lines().take(10_000) {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                let agent = value.to_lowercase();
                in_relevant_group = agent == "*" || ua_token.contains(&agent) || agent.contains(&ua_token);
            }
            "crawl-delay" if in_relevant_group => {
                if let Ok(secs) = value.parse::<f64>() {
                    crawl_delay = Some(Duration::from_secs_f64(secs.max(0.0)));
                }
            }
            "sitemap" => {
                sitemaps.push((value.to_string(), 0.5));
            }
            _ => {}
        }
    }

    RobotsRecord {
        raw: raw.to_string(),
        crawl_delay,
        sitemaps,
        fetched_at: std::time::Instant::now(),
        ttl,
    }
}
