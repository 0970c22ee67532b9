//! Crate-wide error type.
//!
//! Most component contracts in this crate return plain decision enums
//! (`EnqueueOutcome`, `AllowDecision`, `RateLimitDecision`, ...) rather than
//! `Result`, because a denied robots check or a rate-limited domain is
//! expected data, not a failure. `CrawlerError` is reserved for the handful
//! of boundaries where an operation genuinely cannot proceed: disk I/O,
//! fatal startup configuration, and network/storage errors that bubble up
//! to the orchestrator for accounting.

use std::fmt;

/// Process exit codes per the CLI contract.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const INVALID_ARGS: i32 = 2;
    pub const FATAL_INIT: i32 = 3;
    pub const SIGNAL_SHUTDOWN: i32 = 130;
}

#[derive(thiserror::Error, Debug)]
pub enum CrawlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("fatal initialisation error: {0}")]
    FatalInit(String),

    #[error("fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Coarse classification used to bucket fetch failures into the statistics
/// counters and to decide whether a failure is transient or permanent.
///
/// Mirrors the teacher's `FailureKind` classification for retry decisions,
/// generalised to the crawler's own outcome taxonomy (spec.md §4.7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// DNS, connect, TLS, read, or total-timeout failure.
    Network,
    /// 3xx with redirects exhausted, or 4xx other than 401/403.
    Http,
    /// 429 / 503 — rate limited.
    RateLimited,
    /// 401 / 403 — permanently discouraged, not retried this run.
    Forbidden,
    /// Malformed HTML/XML that still yielded a best-effort result.
    Parse,
    /// Disk full, permission denied, or other storage failure.
    Storage,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Http => "http",
            Self::RateLimited => "rate_limited",
            Self::Forbidden => "forbidden",
            Self::Parse => "parse",
            Self::Storage => "storage",
        };
        write!(f, "{s}")
    }
}
