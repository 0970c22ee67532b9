//! End-to-end smoke test: robots.txt gating, a single politely-fetched
//! page, link discovery, and durable storage, driven against a fake HTTP
//! origin (spec.md §8 Scenario-style coverage for the fetch/storage path).

use std::sync::Arc;
use std::time::Duration;

use crawler::config::Config;
use crawler::fetch_engine::{FetchContext, FetchEngine};
use crawler::frontier::Frontier;
use crawler::http_client::ReqwestDownloader;
use crawler::metadata_store::MetadataStore;
use crawler::metrics::Metrics;
use crawler::model::UrlRecord;
use crawler::rate_limiter::RateLimiter;
use crawler::robots_cache::RobotsCache;
use crawler::shutdown::ShutdownSignal;
use crawler::spill_queue::SpillQueue;
use crawler::storage_sink::StorageSink;
use crawler::url_filter::UrlFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a `Config` directly rather than through `Config::load`, so tests
/// don't race each other over shared process environment variables.
fn test_config(data_dir: &std::path::Path) -> Config {
    std::fs::create_dir_all(data_dir).unwrap();
    Config {
        threads: 1,
        max_depth: crawler::utils::constants::DEFAULT_MAX_DEPTH,
        max_queue_size: crawler::utils::constants::DEFAULT_C_MEM,
        config_dir: data_dir.join("config"),
        data_dir: data_dir.to_path_buf(),
        user_agent: crawler::utils::constants::DEFAULT_USER_AGENT.to_string(),
        max_pages: None,
        excluded_extensions: Vec::new(),
        excluded_patterns: Vec::new(),
        high_priority_domains: Vec::new(),
        seeds: Vec::new(),
        feeds: Vec::new(),
        sitemaps: Vec::new(),
        shutdown_deadline: Duration::from_secs(60),
        storage_flush_deadline: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn fetches_seed_page_discovers_link_and_stores_document() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
        .mount(&server)
        .await;

    let filler = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor incididunt ut labore et dolore magna aliqua ut enim ad minim veniam quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat duis aute irure dolor in reprehenderit in voluptate velit esse cillum dolore eu fugiat nulla pariatur excepteur sint occaecat cupidatat non proident sunt in culpa qui officia deserunt mollit anim id est laborum";

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<!doctype html><html><body><p>{filler}</p><p>{filler}</p><a href=\"{}/child\">child</a></body></html>",
            server.uri()
        )).insert_header("content-type", "text/html"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/child"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string(format!(
            "<!doctype html><html><body><p>{filler}</p><p>{filler}</p></body></html>"
        )))
        .mount(&server)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(data_dir.path()));

    let metrics = Arc::new(Metrics::new());
    let spill = Arc::new(SpillQueue::open(&config.spill_dir(), 4).unwrap());
    let frontier = Arc::new(Frontier::new(spill, 10_000, 100, 100, config.max_depth, metrics.clone()));
    let metadata = MetadataStore::open(&config.metadata_dir()).await.unwrap();

    let client = reqwest::Client::builder().user_agent(config.user_agent.clone()).build().unwrap();
    let downloader: Arc<dyn crawler::http_client::Downloader> = Arc::new(ReqwestDownloader::new(client));
    let robots = Arc::new(RobotsCache::new(downloader, config.user_agent.clone(), Duration::from_millis(1), 1_000));
    let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(1)));
    let blacklist = Arc::new(crawler::blacklist::Blacklist::new(metrics.clone()));
    let url_filter = Arc::new(UrlFilter::from_config(&config));

    let (storage, storage_rx) = StorageSink::new(100, metrics.clone());

    let ctx = Arc::new(FetchContext {
        frontier: frontier.clone(),
        robots,
        rate_limiter,
        blacklist,
        url_filter,
        metadata: metadata.clone(),
        storage: storage.clone(),
        metrics: metrics.clone(),
        max_depth: config.max_depth,
        max_pages: None,
    });

    frontier.enqueue_bulk(vec![UrlRecord::new(format!("{}/page", server.uri()), 1.0, 0, String::new())]);

    let engine = Arc::new(FetchEngine::new(&config.user_agent, 4).unwrap());
    let shutdown = Arc::new(ShutdownSignal::new());
    let worker_shutdown = shutdown.clone();
    let worker_ctx = ctx.clone();
    let worker = tokio::spawn(engine.run_worker(0, worker_ctx, worker_shutdown));

    // Give the worker time to fetch the seed, discover /child, and fetch it too.
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.trigger();
    worker.await.unwrap();
    drop(storage);
    drop(storage_rx);

    let snapshot = metrics.snapshot();
    assert!(snapshot.pages_fetched >= 2, "expected seed + child to be fetched, got {}", snapshot.pages_fetched);
    assert!(snapshot.links_discovered >= 1);
    assert_eq!(snapshot.robots_denied, 0);
}

#[tokio::test]
async fn robots_disallow_blocks_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .mount(&server)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(data_dir.path()));

    let metrics = Arc::new(Metrics::new());
    let spill = Arc::new(SpillQueue::open(&config.spill_dir(), 4).unwrap());
    let frontier = Arc::new(Frontier::new(spill, 10_000, 100, 100, config.max_depth, metrics.clone()));
    let metadata = MetadataStore::open(&config.metadata_dir()).await.unwrap();

    let client = reqwest::Client::builder().user_agent(config.user_agent.clone()).build().unwrap();
    let downloader: Arc<dyn crawler::http_client::Downloader> = Arc::new(ReqwestDownloader::new(client));
    let robots = Arc::new(RobotsCache::new(downloader, config.user_agent.clone(), Duration::from_millis(1), 1_000));
    let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(1)));
    let blacklist = Arc::new(crawler::blacklist::Blacklist::new(metrics.clone()));
    let url_filter = Arc::new(UrlFilter::from_config(&config));
    let (storage, storage_rx) = StorageSink::new(100, metrics.clone());

    let ctx = Arc::new(FetchContext {
        frontier: frontier.clone(),
        robots,
        rate_limiter,
        blacklist,
        url_filter,
        metadata,
        storage: storage.clone(),
        metrics: metrics.clone(),
        max_depth: config.max_depth,
        max_pages: None,
    });

    frontier.enqueue_bulk(vec![UrlRecord::new(format!("{}/forbidden", server.uri()), 1.0, 0, String::new())]);

    let engine = Arc::new(FetchEngine::new(&config.user_agent, 4).unwrap());
    let shutdown = Arc::new(ShutdownSignal::new());
    let worker = tokio::spawn(engine.run_worker(0, ctx, shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.trigger();
    worker.await.unwrap();
    drop(storage);
    drop(storage_rx);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.pages_fetched, 0);
    assert!(snapshot.robots_denied >= 1);
}
