//! Shared default values and tuning constants.
//!
//! Collecting these in one module keeps magic numbers out of the component
//! code and gives each default a single place to carry its rationale.

use std::time::Duration;

/// Bounded in-memory frontier capacity (spec.md §3 "FrontierState").
pub const DEFAULT_C_MEM: usize = 500_000;
/// Low-water mark that triggers predictive refill from the spill queue.
pub const DEFAULT_C_LOW: usize = 3_000;
/// Batch size pulled from the spill queue on each refill tick.
pub const DEFAULT_B_REFILL: usize = 1_500;
/// How often the refill task checks the frontier's fill level.
pub const REFILL_INTERVAL: Duration = Duration::from_millis(200);

/// Number of independent spill shards.
pub const DEFAULT_SPILL_SHARDS: usize = 16;
/// A shard is compacted once its consumed prefix exceeds this many bytes.
pub const SPILL_COMPACT_BYTES: u64 = 64 * 1024 * 1024;
/// ...or once the consumed prefix exceeds this fraction of the file.
pub const SPILL_COMPACT_FRACTION: f64 = 0.70;

/// Shard count for `MetadataStore`'s sharded mutex map.
pub const METADATA_SHARDS: usize = 32;
/// Maximum persistence writes flushed to the KV store per batch.
pub const METADATA_FLUSH_BATCH: usize = 100;
/// How often the persistence worker drains its write queue.
pub const METADATA_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Base interval used to compute `expected_next_crawl` for unchanged pages.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Default minimum inter-request interval per domain, absent a robots.txt
/// crawl-delay (spec.md §3 "DomainState").
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(200);
/// Cap on the per-domain minimum interval after repeated 429/503 back-off.
pub const MAX_THROTTLE_INTERVAL: Duration = Duration::from_secs(60);
/// Consecutive domain errors within `ERROR_WINDOW` before blacklisting.
pub const BLACKLIST_ERROR_THRESHOLD: u32 = 5;
pub const ERROR_WINDOW: Duration = Duration::from_secs(10 * 60);
/// Transient blacklist TTL applied after the error threshold is hit.
pub const DEFAULT_BLACKLIST_TTL: Duration = Duration::from_secs(3600);

/// RobotsCache default TTL absent a smaller cache-control max-age.
pub const ROBOTS_DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);
/// Timeout applied to robots.txt fetches specifically (tighter than page fetches).
pub const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Number of distinct origins the LRU robots cache holds at once.
pub const DEFAULT_ROBOTS_CACHE_CAPACITY: usize = 10_000;

/// HtmlExtractor content-size admissibility window.
pub const MIN_CONTENT_SIZE: usize = 512;
pub const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024;
/// Minimum alphanumeric-outside-tags bytes within the first 64 KiB.
pub const MIN_ALPHANUMERIC_BYTES: usize = 200;
/// If noise stripping would remove more than this fraction, skip it.
pub const MAX_NOISE_STRIP_FRACTION: f64 = 0.70;

/// Per-worker in-flight request budget (spec.md §4.7).
pub const DEFAULT_C_REQ: usize = 18;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_REDIRECTS: usize = 5;
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_LINKS_PER_PAGE: usize = 50;
pub const DEFAULT_USER_AGENT: &str = "CrawlerCoreBot/0.1 (+https://example.invalid/bot)";

/// StorageSink batching.
pub const STORAGE_BATCH_MAX_DOCS: usize = 25;
pub const STORAGE_BATCH_MAX_AGE: Duration = Duration::from_secs(5);
pub const STORAGE_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
/// Bounded in-memory submit queue depth before `submit` drops to metadata-only.
pub const STORAGE_QUEUE_CAPACITY: usize = 2_000;
/// Character cap on the HTML snapshot embedded in a stored document.
pub const STORAGE_HTML_SNAPSHOT_CHARS: usize = 20_000;

/// Whole-process shutdown deadline (spec.md §4.11, §5).
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);
/// Cadence of the periodic statistics log line.
pub const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Sitemap ingestion default cadence.
pub const DEFAULT_SITEMAP_PARSE_INTERVAL_HOURS: u32 = 1;
/// Feed ingestion defaults (spec.md §4.10).
pub const DEFAULT_FEED_POLL_INTERVAL_MINUTES: u32 = 10;
pub const MAX_FEED_POLL_INTERVAL_MINUTES: u32 = 60;
pub const FEED_FRESHNESS_WINDOW: Duration = Duration::from_secs(48 * 3600);
pub const FEED_URL_PRIORITY: f32 = 0.8;
/// Cap on `FeedState::consecutive_failures`; reaching it disables the feed
/// (spec.md §4.10 "consecutive_failures (0-5)").
pub const MAX_FEED_CONSECUTIVE_FAILURES: u32 = 5;

/// Admissibility / priority scoring (spec.md §4.5).
pub const MAX_CRAWLABLE_URL_LEN: usize = 500;
pub const DEPTH_PRIORITY_PENALTY: f32 = 0.12;
pub const MIN_PRIORITY: f32 = 0.05;
pub const MAX_PRIORITY: f32 = 1.0;

/// Default maximum crawl depth, overridable via CLI arg (spec.md §6).
pub const DEFAULT_MAX_DEPTH: u16 = 5;
