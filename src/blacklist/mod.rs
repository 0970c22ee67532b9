//! Transient and persistent domain denylist with decay (spec.md §4.5
//! "Blacklist"). Grounded in the teacher's `CircuitBreaker`'s
//! `DashMap<String, _>` per-domain health tracking, simplified to the
//! binary denylist the spec calls for rather than a three-state circuit.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metrics::Metrics;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Entry {
    /// Decays automatically once `until` has passed.
    Transient { until: Instant },
    /// Never auto-decays; only `remove` clears it.
    Persistent,
}

pub struct Blacklist {
    domains: DashMap<String, Entry>,
    metrics: Arc<Metrics>,
}

impl Blacklist {
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            domains: DashMap::new(),
            metrics,
        }
    }

    /// Adds `domain` to the transient denylist for `ttl` (spec.md §4.5).
    pub fn add(&self, domain: &str, ttl: Duration) {
        self.domains.insert(
            domain.to_string(),
            Entry::Transient {
                until: Instant::now() + ttl,
            },
        );
        log::warn!("blacklisted domain {domain} for {ttl:?}");
    }

    /// Adds `domain` to the persistent tier, never auto-decayed (spec.md §4.5).
    pub fn add_persistent(&self, domain: &str) {
        self.domains.insert(domain.to_string(), Entry::Persistent);
        log::warn!("permanently blacklisted domain {domain}");
    }

    /// Returns `true` if `domain` is currently denied. A transient entry
    /// whose TTL has elapsed is lazily evicted and reported as not
    /// blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, domain: &str) -> bool {
        match self.domains.get(domain).map(|e| *e) {
            Some(Entry::Persistent) => {
                self.metrics.blacklisted_skips.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                true
            }
            Some(Entry::Transient { until }) => {
                if Instant::now() >= until {
                    self.domains.remove(domain);
                    false
                } else {
                    self.metrics.blacklisted_skips.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    true
                }
            }
            None => false,
        }
    }

    pub fn remove(&self, domain: &str) {
        self.domains.remove(domain);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blacklist() -> Blacklist {
        Blacklist::new(Arc::new(Metrics::default()))
    }

    #[test]
    fn fresh_domain_not_blacklisted() {
        let b = blacklist();
        assert!(!b.is_blacklisted("a.test"));
    }

    #[test]
    fn transient_entry_decays_after_ttl() {
        let b = blacklist();
        b.add("a.test", Duration::from_millis(10));
        assert!(b.is_blacklisted("a.test"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!b.is_blacklisted("a.test"));
    }

    #[test]
    fn persistent_entry_never_decays() {
        let b = blacklist();
        b.add_persistent("bad.test");
        std::thread::sleep(Duration::from_millis(10));
        assert!(b.is_blacklisted("bad.test"));
    }

    #[test]
    fn remove_clears_either_tier() {
        let b = blacklist();
        b.add_persistent("bad.test");
        b.remove("bad.test");
        assert!(!b.is_blacklisted("bad.test"));
    }
}
