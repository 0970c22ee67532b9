//! Process lifecycle: leaf-first component startup, worker pool, signal
//! handling, and the six-step shutdown protocol (spec.md §4.11).
//!
//! The fan-out/fan-in loop itself lives in `fetch_engine::FetchEngine`; this
//! module's job is closer to the teacher's `crawl_engine::orchestrator`
//! startup/shutdown choreography — minus the browser lifecycle, which has
//! no counterpart here — generalised to a pool of `W` independent workers
//! instead of one queue drained by N spawned page tasks sharing a browser.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const MAX_PAGES_POLL_INTERVAL: Duration = Duration::from_millis(500);

use tokio::signal::unix::{signal, SignalKind};

use crate::blacklist::Blacklist;
use crate::config::Config;
use crate::error::{exit_code, CrawlerError, Result};
use crate::feed_ingestor::FeedIngestor;
use crate::fetch_engine::{FetchContext, FetchEngine};
use crate::frontier::Frontier;
use crate::http_client::{Downloader, ReqwestDownloader};
use crate::metadata_store::MetadataStore;
use crate::metrics::{Metrics, RateTracker};
use crate::model::UrlRecord;
use crate::rate_limiter::RateLimiter;
use crate::robots_cache::RobotsCache;
use crate::shutdown::ShutdownSignal;
use crate::sitemap_ingestor::SitemapIngestor;
use crate::spill_queue::SpillQueue;
use crate::storage_sink::StorageSink;
use crate::url_filter::UrlFilter;
use crate::utils::constants::{
    DEFAULT_C_LOW, DEFAULT_C_REQ, DEFAULT_MIN_INTERVAL, DEFAULT_ROBOTS_CACHE_CAPACITY,
    DEFAULT_SPILL_SHARDS, STATS_LOG_INTERVAL, STORAGE_QUEUE_CAPACITY,
};

/// Outcome of a full crawl run, reported to `main` for the process exit code.
pub enum ShutdownCause {
    Normal,
    Signal,
}

/// Owns every long-lived component and background task handle for one
/// crawl run.
pub struct CrawlerOrchestrator {
    config: Arc<Config>,
    shutdown: Arc<ShutdownSignal>,
    frontier: Arc<Frontier>,
    metadata: Arc<MetadataStore>,
    storage: Arc<StorageSink>,
    metrics: Arc<Metrics>,
    fetch_ctx: Arc<FetchContext>,
}

impl CrawlerOrchestrator {
    /// Builds every component leaf-first: SpillQueue → Frontier →
    /// MetadataStore → RobotsCache → RateLimiter/Blacklist/UrlFilter →
    /// StorageSink → FetchEngine (spec.md §4.11 "starts components in
    /// leaf-first order").
    pub async fn bootstrap(config: Config) -> Result<(Self, tokio::sync::mpsc::Receiver<crate::model::Document>)> {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let shutdown = Arc::new(ShutdownSignal::new());

        let spill = Arc::new(SpillQueue::open(&config.spill_dir(), DEFAULT_SPILL_SHARDS)?);
        let frontier = Arc::new(Frontier::new(
            spill,
            config.max_queue_size,
            DEFAULT_C_LOW,
            DEFAULT_C_LOW / 2,
            config.max_depth,
            metrics.clone(),
        ));

        let metadata = MetadataStore::open(&config.metadata_dir()).await?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(CrawlerError::Fetch)?;
        let robots_downloader: Arc<dyn Downloader> = Arc::new(ReqwestDownloader::new(client));

        let robots = Arc::new(RobotsCache::new(robots_downloader, config.user_agent.clone(), DEFAULT_MIN_INTERVAL, DEFAULT_ROBOTS_CACHE_CAPACITY));
        let rate_limiter = Arc::new(RateLimiter::new(DEFAULT_MIN_INTERVAL));
        let blacklist = Arc::new(Blacklist::new(metrics.clone()));
        let url_filter = Arc::new(UrlFilter::from_config(&config));

        let (storage, storage_rx) = StorageSink::new(STORAGE_QUEUE_CAPACITY, metrics.clone());

        let fetch_ctx = Arc::new(FetchContext {
            frontier: frontier.clone(),
            robots,
            rate_limiter,
            blacklist,
            url_filter,
            metadata: metadata.clone(),
            storage: storage.clone(),
            metrics: metrics.clone(),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
        });

        Ok((
            Self {
                config,
                shutdown,
                frontier,
                metadata,
                storage,
                metrics,
                fetch_ctx,
            },
            storage_rx,
        ))
    }

    /// Seeds the frontier from `config.seeds` at depth 0.
    fn seed_frontier(&self) {
        let records: Vec<UrlRecord> = self
            .config
            .seeds
            .iter()
            .map(|url| UrlRecord::new(url.clone(), crate::utils::constants::MAX_PRIORITY, 0, String::new()))
            .collect();
        if !records.is_empty() {
            let n = records.len();
            self.frontier.enqueue_bulk(records);
            log::info!("seeded frontier with {n} URLs");
        }
    }

    /// Runs the crawl to completion: launches every worker and background
    /// task, waits for a termination signal or `max_pages` exhaustion, then
    /// executes the shutdown protocol (spec.md §4.11).
    pub async fn run(self, storage_rx: tokio::sync::mpsc::Receiver<crate::model::Document>) -> Result<ShutdownCause> {
        self.seed_frontier();

        let downloader: Arc<dyn Downloader> = Arc::new(ReqwestDownloader::new(
            reqwest::Client::builder()
                .user_agent(self.config.user_agent.clone())
                .build()
                .map_err(CrawlerError::Fetch)?,
        ));

        let sitemap_seeds: Vec<(String, f32)> = self.config.sitemaps.iter().map(|s| (s.url.clone(), s.priority)).collect();
        let sitemap_ingestor = Arc::new(SitemapIngestor::new(
            downloader.clone(),
            self.fetch_ctx.robots.clone(),
            self.frontier.clone(),
            self.metrics.clone(),
            &sitemap_seeds,
            Duration::from_secs(3600),
        ));

        let feed_urls: Vec<String> = self.config.feeds.iter().map(|f| f.url.clone()).collect();
        let feed_ingestor = Arc::new(FeedIngestor::new(
            downloader,
            self.frontier.clone(),
            self.metrics.clone(),
            &feed_urls,
            Duration::from_secs(60),
        ));

        let known_origins = Arc::new(parking_lot::Mutex::new(std::collections::HashSet::new()));
        for url in &self.config.seeds {
            if let Ok(parsed) = url::Url::parse(url) {
                known_origins.lock().insert(parsed.origin().ascii_serialization());
            }
        }

        let mut handles = Vec::new();

        handles.push(tokio::spawn(self.frontier.clone().run_refill_task(self.shutdown.clone())));
        handles.push(tokio::spawn(self.metadata.clone().run_persistence_worker(self.shutdown.clone())));
        handles.push(tokio::spawn(self.storage.clone().run_writer(
            storage_rx,
            self.config.raw_dir(),
            self.config.crawl_log_path(),
            self.config.storage_flush_deadline,
            self.shutdown.clone(),
        )));
        handles.push(tokio::spawn(sitemap_ingestor.run(known_origins, self.shutdown.clone())));
        handles.push(tokio::spawn(feed_ingestor.run(self.shutdown.clone())));

        let engine = Arc::new(FetchEngine::new(&self.config.user_agent, DEFAULT_C_REQ)?);
        for worker_id in 0..self.config.threads {
            let engine = engine.clone();
            let ctx = self.fetch_ctx.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                engine.run_worker(worker_id, ctx, shutdown).await;
            }));
        }

        handles.push(tokio::spawn(run_stats_logger(self.metrics.clone(), self.frontier.clone(), self.shutdown.clone())));

        let cause = wait_for_shutdown_trigger(&self.shutdown, &self.metrics, self.config.max_pages).await;

        self.shutdown_sequence(handles).await;

        Ok(cause)
    }

    /// Executes spec.md §4.11's six-step shutdown protocol.
    async fn shutdown_sequence(&self, handles: Vec<tokio::task::JoinHandle<()>>) {
        // 1. Set the global shutdown flag; wake any suspended waiters.
        self.shutdown.trigger();

        // 2. Stop accepting new Frontier insertions.
        self.frontier.begin_draining();

        // 3. Spill in-memory Frontier to SpillQueue.
        match self.frontier.spill_all() {
            Ok(n) => log::info!("shutdown: spilled {n} in-memory frontier records"),
            Err(e) => log::error!("shutdown: frontier spill failed: {e}"),
        }
        self.frontier.close();

        // 4 & 5. MetadataStore and StorageSink drain themselves once they
        // observe the shutdown signal (steps 4/5 are the background tasks'
        // own responsibility, awaited below as part of step 6).

        // 6. Join threads; on hard deadline, or a second SIGINT, log
        // remaining counts and force an immediate process exit rather than
        // waiting further (a user who hits Ctrl-C twice wants out now).
        let deadline = self.config.shutdown_deadline();
        let join_all = futures_util::future::join_all(handles);
        tokio::select! {
            result = tokio::time::timeout(deadline, join_all) => {
                if result.is_err() {
                    let snapshot = self.metrics.snapshot();
                    log::warn!(
                        "shutdown: hard deadline ({deadline:?}) reached; pages_fetched={} pages_stored={} frontier_approx_total={}",
                        snapshot.pages_fetched,
                        snapshot.pages_stored,
                        self.frontier.approx_total(),
                    );
                } else {
                    log::info!("shutdown: all background tasks joined cleanly");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::warn!("shutdown: second SIGINT received, forcing immediate exit");
                std::process::exit(exit_code::SIGNAL_SHUTDOWN);
            }
        }

        let snapshot = self.metrics.snapshot();
        log::info!(
            "shutdown summary: pages_fetched={} pages_stored={} links_discovered={} total_errors={} metadata_persisted={}",
            snapshot.pages_fetched,
            snapshot.pages_stored,
            snapshot.links_discovered,
            snapshot.total_errors(),
            self.metadata.persisted_writes(),
        );
    }
}

/// Waits for SIGINT/SIGTERM, for `shutdown` to be triggered internally, or
/// for `max_pages` to be reached by polling the statistics counter — fetch
/// workers stop pulling new work once they observe the cap themselves, but
/// only the orchestrator can decide the whole process is therefore done.
async fn wait_for_shutdown_trigger(shutdown: &ShutdownSignal, metrics: &Metrics, max_pages: Option<u64>) -> ShutdownCause {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut poll = tokio::time::interval(MAX_PAGES_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("received SIGINT, beginning graceful shutdown");
                return ShutdownCause::Signal;
            }
            _ = sigterm.recv() => {
                log::info!("received SIGTERM, beginning graceful shutdown");
                return ShutdownCause::Signal;
            }
            _ = shutdown.triggered() => {
                log::info!("shutdown triggered internally");
                return ShutdownCause::Normal;
            }
            _ = poll.tick() => {
                if let Some(max) = max_pages {
                    if metrics.pages_stored.load(Ordering::Relaxed) >= max {
                        log::info!("max_pages ({max}) reached, beginning graceful shutdown");
                        return ShutdownCause::Normal;
                    }
                }
            }
        }
    }
}

/// Periodic "pages/sec · queue-mem · queue-disk · active-requests · error
/// counts" log line (spec.md §7).
async fn run_stats_logger(metrics: Arc<Metrics>, frontier: Arc<Frontier>, shutdown: Arc<ShutdownSignal>) {
    let mut tracker = RateTracker::new();
    let mut interval = tokio::time::interval(STATS_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {}
        }
        let snapshot = metrics.snapshot();
        let rate = tracker.tick(snapshot.pages_fetched);
        log::info!(
            "crawl stats: {rate:.1} pages/s · queue_mem={} queue_disk={} active_requests={} errors(net={} http={} rate_limited={} forbidden={} parse={} storage={}) not_due_skips={}",
            frontier.len(),
            frontier.approx_total().saturating_sub(frontier.len() as u64),
            snapshot.active_requests,
            snapshot.network_failures,
            snapshot.http_failures,
            snapshot.rate_limited,
            snapshot.forbidden_urls,
            snapshot.parse_failures,
            snapshot.storage_failures,
            snapshot.not_due_skips,
        );
    }
}

/// Maps a [`ShutdownCause`] to the CLI's process exit code (spec.md §6).
#[must_use]
pub fn exit_code_for(cause: &ShutdownCause) -> i32 {
    match cause {
        ShutdownCause::Normal => exit_code::OK,
        ShutdownCause::Signal => exit_code::SIGNAL_SHUTDOWN,
    }
}

