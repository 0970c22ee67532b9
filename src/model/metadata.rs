use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Cap on `UrlMetadata::backoff_multiplier` (spec.md §4.3).
pub const BACKOFF_CAP: u32 = 32;
/// Cap on `UrlMetadata::temporary_failures` (spec.md §3).
pub const MAX_TEMPORARY_FAILURES: u8 = 5;

/// Per-URL crawl history (spec.md §3 "UrlMetadata").
///
/// Invariants (enforced by the mutating methods below, never by callers):
/// `previous_change_time <= last_crawl_time <= expected_next_crawl`;
/// `temporary_failures` stays in `[0, MAX_TEMPORARY_FAILURES]`;
/// `backoff_multiplier` doubles on unchanged content up to `BACKOFF_CAP`
/// and resets to 1 on detected change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlMetadata {
    pub last_crawl_time: SystemTime,
    pub previous_change_time: SystemTime,
    pub expected_next_crawl: SystemTime,
    pub content_hash: String,
    pub backoff_multiplier: u32,
    pub crawl_count: u64,
    /// Exponentially weighted moving average of change frequency: 0 = never
    /// changes, 1 = changes every crawl.
    pub change_frequency: f32,
    pub temporary_failures: u8,
}

impl UrlMetadata {
    #[must_use]
    pub fn fresh(now: SystemTime) -> Self {
        Self {
            last_crawl_time: now,
            previous_change_time: now,
            expected_next_crawl: now,
            content_hash: String::new(),
            backoff_multiplier: 1,
            crawl_count: 0,
            change_frequency: 0.5,
            temporary_failures: 0,
        }
    }

    /// Applies a successful fetch (spec.md §4.3 `record_success`).
    pub fn record_success(&mut self, new_hash: &str, fetched_at: SystemTime, base_interval: Duration) {
        self.last_crawl_time = fetched_at;
        self.crawl_count += 1;
        self.temporary_failures = 0;

        const EWMA_ALPHA: f32 = 0.3;
        if self.content_hash != new_hash {
            self.previous_change_time = fetched_at;
            self.content_hash = new_hash.to_string();
            self.backoff_multiplier = 1;
            // Bias toward "faster": frequency moves toward 1.0.
            self.change_frequency += EWMA_ALPHA * (1.0 - self.change_frequency);
        } else {
            self.backoff_multiplier = (self.backoff_multiplier * 2).min(BACKOFF_CAP);
            // Bias toward "slower": frequency moves toward 0.0.
            self.change_frequency -= EWMA_ALPHA * self.change_frequency;
        }

        self.expected_next_crawl = fetched_at + base_interval * self.backoff_multiplier;
    }

    /// Applies a transient fetch failure (spec.md §4.3 `record_temporary_failure`).
    /// Does not alter `content_hash`.
    pub fn record_temporary_failure(&mut self, fetched_at: SystemTime) {
        self.temporary_failures = (self.temporary_failures + 1).min(MAX_TEMPORARY_FAILURES);
        let minutes = 1u64 << self.temporary_failures;
        self.expected_next_crawl = fetched_at + Duration::from_secs(minutes * 60);
    }

    /// 401/403: discourage indefinitely without touching the failure counter
    /// or blacklisting the domain (spec.md §4.7).
    pub fn mark_permanently_discouraged(&mut self, fetched_at: SystemTime) {
        self.last_crawl_time = fetched_at;
        self.expected_next_crawl = fetched_at + Duration::from_secs(365 * 24 * 3600);
    }

    #[must_use]
    pub fn is_ready(&self, now: SystemTime) -> bool {
        now >= self.expected_next_crawl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unchanged_content_doubles_backoff() {
        let base = Duration::from_secs(3600);
        let t0 = SystemTime::UNIX_EPOCH;
        let mut meta = UrlMetadata::fresh(t0);
        meta.record_success("abc", t0, base);
        assert_eq!(meta.backoff_multiplier, 1);

        let t1 = t0 + Duration::from_secs(3600);
        meta.record_success("abc", t1, base);
        assert_eq!(meta.backoff_multiplier, 2);
        assert_eq!(meta.expected_next_crawl, t1 + base * 2);

        let t2 = t1 + Duration::from_secs(3600);
        meta.record_success("abc", t2, base);
        assert_eq!(meta.backoff_multiplier, 4);
    }

    #[test]
    fn changed_content_resets_backoff() {
        let base = Duration::from_secs(3600);
        let t0 = SystemTime::UNIX_EPOCH;
        let mut meta = UrlMetadata::fresh(t0);
        meta.record_success("v1", t0, base);
        let t1 = t0 + Duration::from_secs(3600);
        meta.record_success("v1", t1, base);
        assert_eq!(meta.backoff_multiplier, 2);

        let t2 = t1 + Duration::from_secs(3600);
        meta.record_success("v2", t2, base);
        assert_eq!(meta.backoff_multiplier, 1);
        assert_eq!(meta.previous_change_time, t2);
    }

    #[test]
    fn temporary_failures_cap_at_five() {
        let t0 = SystemTime::UNIX_EPOCH;
        let mut meta = UrlMetadata::fresh(t0);
        for _ in 0..10 {
            meta.record_temporary_failure(t0);
        }
        assert_eq!(meta.temporary_failures, MAX_TEMPORARY_FAILURES);
    }

    #[test]
    fn invariant_previous_change_le_last_crawl_le_expected_next() {
        let base = Duration::from_secs(60);
        let t0 = SystemTime::UNIX_EPOCH;
        let mut meta = UrlMetadata::fresh(t0);
        for i in 1..20u64 {
            let t = t0 + Duration::from_secs(i * 60);
            meta.record_success(if i % 3 == 0 { "a" } else { "b" }, t, base);
            assert!(meta.previous_change_time <= meta.last_crawl_time);
            assert!(meta.last_crawl_time <= meta.expected_next_crawl);
        }
    }

    proptest! {
        /// spec.md §8 property 2: "Metadata monotonicity" — across an
        /// arbitrary sequence of successes and failures, `last_crawl_time`
        /// only advances and `crawl_count` only increases.
        #[test]
        fn last_crawl_time_and_crawl_count_are_monotonic(
            outcomes in prop::collection::vec(0u8..3, 1..30),
        ) {
            let base = Duration::from_secs(3600);
            let t0 = SystemTime::UNIX_EPOCH;
            let mut meta = UrlMetadata::fresh(t0);
            let mut prev_last_crawl = meta.last_crawl_time;
            let mut prev_crawl_count = meta.crawl_count;
            let mut clock = t0;

            for (i, outcome) in outcomes.into_iter().enumerate() {
                clock += Duration::from_secs(60);
                match outcome {
                    0 => meta.record_success("same", clock, base),
                    1 => meta.record_success(if i % 2 == 0 { "x" } else { "y" }, clock, base),
                    _ => meta.record_temporary_failure(clock),
                }
                prop_assert!(meta.last_crawl_time >= prev_last_crawl);
                prop_assert!(meta.crawl_count >= prev_crawl_count);
                prop_assert!(meta.previous_change_time <= meta.last_crawl_time);
                prev_last_crawl = meta.last_crawl_time;
                prev_crawl_count = meta.crawl_count;
            }
        }

        /// spec.md §8 property 6: "Backoff progression" — n consecutive
        /// unchanged successful fetches push `expected_next_crawl - last_crawl`
        /// to at least `base * min(cap, 2^n)`.
        #[test]
        fn backoff_progression_matches_formula(n in 1u32..8) {
            let base = Duration::from_secs(3600);
            let t0 = SystemTime::UNIX_EPOCH;
            let mut meta = UrlMetadata::fresh(t0);
            meta.record_success("stable", t0, base);

            let mut clock = t0;
            for _ in 0..n {
                clock += base;
                meta.record_success("stable", clock, base);
            }

            let expected_multiplier = (1u32 << n).min(BACKOFF_CAP);
            let gap = meta
                .expected_next_crawl
                .duration_since(meta.last_crawl_time)
                .unwrap();
            prop_assert_eq!(gap, base * expected_multiplier);
        }
    }
}
