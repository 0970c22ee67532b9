use std::time::{Duration, Instant};

/// A cached, parsed robots.txt for one origin (spec.md §3 "RobotsRecord").
#[derive(Debug, Clone)]
pub struct RobotsRecord {
    pub raw: String,
    pub crawl_delay: Option<Duration>,
    pub sitemaps: Vec<(String, f32)>,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl RobotsRecord {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }

    /// An "allow all, no sitemaps" record for origins whose robots.txt is
    /// missing, forbidden, or empty (spec.md §4.4).
    #[must_use]
    pub fn allow_all(ttl: Duration) -> Self {
        Self {
            raw: String::new(),
            crawl_delay: None,
            sitemaps: Vec::new(),
            fetched_at: Instant::now(),
            ttl,
        }
    }
}
