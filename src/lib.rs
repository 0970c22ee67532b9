//! High-throughput, polite, restart-durable web crawler core.
//!
//! The crate is organised around the pipeline a single URL travels
//! through: `Frontier` (priority queue + disk spill) feeds `FetchEngine`
//! workers, which consult `RobotsCache`/`RateLimiter`/`Blacklist`/
//! `UrlFilter` before every request, extract links and content with
//! `HtmlExtractor`, persist outcomes through `MetadataStore` and
//! `StorageSink`, and get their URL supply supplemented by
//! `SitemapIngestor` and `FeedIngestor`. `CrawlerOrchestrator` wires all
//! of the above together and owns process lifecycle.

pub mod blacklist;
pub mod config;
pub mod error;
pub mod feed_ingestor;
pub mod fetch_engine;
pub mod frontier;
pub mod html_extractor;
pub mod http_client;
pub mod metadata_store;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod rate_limiter;
pub mod robots_cache;
pub mod shutdown;
pub mod sitemap_ingestor;
pub mod spill_queue;
pub mod storage_sink;
pub mod url_filter;
pub mod utils;

pub use config::Config;
pub use error::{CrawlerError, Result};
pub use orchestrator::{exit_code_for, CrawlerOrchestrator, ShutdownCause};
