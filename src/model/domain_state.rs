use std::time::{Duration, Instant};

/// Politeness state for a single domain (spec.md §3 "DomainState").
///
/// Created on first request to a domain, mutated only under that domain's
/// shard lock, and lives for the process's lifetime.
#[derive(Debug, Clone)]
pub struct DomainState {
    pub last_permit: Instant,
    pub min_interval: Duration,
    pub consecutive_errors: u32,
    pub throttle_until: Option<Instant>,
    /// When the current run of consecutive errors started, for the
    /// blacklist error-window check (spec.md §4.5: "5 within a window").
    pub error_window_start: Option<Instant>,
}

impl DomainState {
    #[must_use]
    pub fn new(default_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            // Far enough in the past that the first request is always permitted.
            last_permit: now.checked_sub(default_interval).unwrap_or(now),
            min_interval: default_interval,
            consecutive_errors: 0,
            throttle_until: None,
            error_window_start: None,
        }
    }
}
