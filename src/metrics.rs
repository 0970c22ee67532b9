//! Crawl-wide statistics counters.
//!
//! Generalises the teacher's `crawl_events::metrics::EventBusMetrics`
//! atomics-plus-`snapshot()` idiom to the counters this crawler's
//! orchestrator needs for its periodic log line and shutdown summary
//! (spec.md §7): pages/sec, in-memory and spilled queue depth, active
//! requests, and a count per `FailureClass`.
//!
//! All fields are independent atomics. Readers see eventually consistent
//! values — there is no cross-field snapshot lock, matching spec.md §5's
//! "statistics counters are atomics; readers see eventually consistent
//! values".

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::FailureClass;

#[derive(Debug, Default)]
pub struct Metrics {
    pub pages_fetched: AtomicU64,
    pub pages_stored: AtomicU64,
    pub links_discovered: AtomicU64,
    pub active_requests: AtomicUsize,
    pub robots_denied: AtomicU64,
    pub rate_limited: AtomicU64,
    pub blacklisted_skips: AtomicU64,
    pub admissibility_rejections: AtomicU64,
    pub network_failures: AtomicU64,
    pub http_failures: AtomicU64,
    pub forbidden_urls: AtomicU64,
    pub parse_failures: AtomicU64,
    pub storage_failures: AtomicU64,
    pub storage_dropped: AtomicU64,
    pub not_due_skips: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, class: FailureClass) {
        let counter = match class {
            FailureClass::Network => &self.network_failures,
            FailureClass::Http => &self.http_failures,
            FailureClass::RateLimited => &self.rate_limited,
            FailureClass::Forbidden => &self.forbidden_urls,
            FailureClass::Parse => &self.parse_failures,
            FailureClass::Storage => &self.storage_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_stored: self.pages_stored.load(Ordering::Relaxed),
            links_discovered: self.links_discovered.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            robots_denied: self.robots_denied.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            blacklisted_skips: self.blacklisted_skips.load(Ordering::Relaxed),
            admissibility_rejections: self.admissibility_rejections.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            http_failures: self.http_failures.load(Ordering::Relaxed),
            forbidden_urls: self.forbidden_urls.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            storage_dropped: self.storage_dropped.load(Ordering::Relaxed),
            not_due_skips: self.not_due_skips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub pages_fetched: u64,
    pub pages_stored: u64,
    pub links_discovered: u64,
    pub active_requests: usize,
    pub robots_denied: u64,
    pub rate_limited: u64,
    pub blacklisted_skips: u64,
    pub admissibility_rejections: u64,
    pub network_failures: u64,
    pub http_failures: u64,
    pub forbidden_urls: u64,
    pub parse_failures: u64,
    pub storage_failures: u64,
    pub storage_dropped: u64,
    pub not_due_skips: u64,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.network_failures
            + self.http_failures
            + self.forbidden_urls
            + self.parse_failures
            + self.storage_failures
    }
}

/// Tracks pages/sec between two snapshots of `pages_fetched`.
pub struct RateTracker {
    last_instant: Instant,
    last_count: u64,
}

impl RateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_instant: Instant::now(),
            last_count: 0,
        }
    }

    /// Returns pages/sec observed since the previous call, then resets the window.
    pub fn tick(&mut self, current_count: u64) -> f64 {
        let elapsed = self.last_instant.elapsed().as_secs_f64();
        let delta = current_count.saturating_sub(self.last_count);
        self.last_instant = Instant::now();
        self.last_count = current_count;
        if elapsed <= 0.0 {
            0.0
        } else {
            delta as f64 / elapsed
        }
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}
