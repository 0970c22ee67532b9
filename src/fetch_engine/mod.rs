//! Concurrent fetch engine: per-worker non-blocking HTTP multiplexing,
//! politeness gating, and completion dispatch (spec.md §4.7).
//!
//! Each worker owns one `FuturesUnordered` of un-spawned fetch futures —
//! the async equivalent of a libcurl multi-handle tracking up to `C_req`
//! concurrent transfers on a single task, matching spec.md §5 ("no global
//! event loop: each fetch worker owns its own multi-handle and polls it").
//! This generalises the teacher's `orchestrator::crawl_pages` concurrency
//! idiom (`Semaphore` + `FuturesUnordered` fan-out/fan-in loop over
//! `tokio::spawn`ed page tasks) to un-spawned futures polled in place,
//! since there is no browser handle to share across a spawned task here.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use futures_util::stream::{FuturesUnordered, StreamExt};
use url::Url;

use crate::blacklist::Blacklist;
use crate::error::FailureClass;
use crate::frontier::Frontier;
use crate::html_extractor::HtmlExtractor;
use crate::metadata_store::MetadataStore;
use crate::metrics::Metrics;
use crate::model::{Document, UrlRecord};
use crate::rate_limiter::{ErrorKind, RateLimiter};
use crate::robots_cache::{AllowDecision, RobotsCache};
use crate::shutdown::ShutdownSignal;
use crate::storage_sink::StorageSink;
use crate::url_filter::UrlFilter;
use crate::utils::constants::{
    CONNECT_TIMEOUT, DEFAULT_BASE_INTERVAL, DEFAULT_C_REQ, MAX_BODY_BYTES, MAX_REDIRECTS,
    TOTAL_TIMEOUT,
};
use crate::utils::content_hash;
use crate::utils::string_utils::registrable_domain;

/// Bound on how long a worker waits, per poll, for any in-flight transfer
/// to complete before re-checking the frontier and shutdown flag (spec.md
/// §4.7 "up to ~50 ms").
const POLL_WAIT: Duration = Duration::from_millis(50);
/// Backoff applied when the frontier has nothing to offer (spec.md §5).
const EMPTY_FRONTIER_BACKOFF: Duration = Duration::from_millis(50);
/// Bound on how long a worker waits for in-flight transfers to finish once
/// shutdown has been requested before abandoning them.
const WORKER_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

type FetchFuture = std::pin::Pin<Box<dyn std::future::Future<Output = (UrlRecord, FetchAttempt)> + Send>>;

enum FetchAttempt {
    Response { status: u16, content_type: String, final_url: String, body: Vec<u8> },
    Error(ErrorSource),
}

enum ErrorSource {
    Network,
}

/// Shared, read-mostly collaborators a worker needs to carry out the
/// politeness checks and completion dispatch of spec.md §4.7.
pub struct FetchContext {
    pub frontier: Arc<Frontier>,
    pub robots: Arc<RobotsCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub blacklist: Arc<Blacklist>,
    pub url_filter: Arc<UrlFilter>,
    pub metadata: Arc<MetadataStore>,
    pub storage: Arc<StorageSink>,
    pub metrics: Arc<Metrics>,
    pub max_depth: u16,
    pub max_pages: Option<u64>,
}

/// Per-worker multiplexed HTTP client (spec.md §4.7 "FetchEngine").
pub struct FetchEngine {
    client: reqwest::Client,
    concurrency_per_worker: usize,
}

impl FetchEngine {
    pub fn new(user_agent: &str, concurrency_per_worker: usize) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(crate::error::CrawlerError::Fetch)?;
        Ok(Self {
            client,
            concurrency_per_worker: if concurrency_per_worker == 0 { DEFAULT_C_REQ } else { concurrency_per_worker },
        })
    }

    /// Drives one worker's lifetime: pulls admissible URLs from the
    /// frontier, keeps up to `C_req` transfers in flight, and dispatches
    /// each completion per spec.md §4.7's outcome table. Runs until
    /// `shutdown` is triggered and in-flight work has drained or the
    /// worker-local deadline elapses.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize, ctx: Arc<FetchContext>, shutdown: Arc<ShutdownSignal>) {
        let mut in_flight: FuturesUnordered<FetchFuture> = FuturesUnordered::new();
        let mut pending: Vec<UrlRecord> = Vec::new();

        loop {
            if shutdown.is_triggered() {
                break;
            }
            if let Some(max) = ctx.max_pages {
                if ctx.metrics.pages_stored.load(Ordering::Relaxed) >= max {
                    break;
                }
            }

            self.fill(&ctx, &mut in_flight, &mut pending).await;

            if in_flight.is_empty() {
                tokio::select! {
                    _ = shutdown.triggered() => break,
                    _ = tokio::time::sleep(EMPTY_FRONTIER_BACKOFF) => continue,
                }
            }

            tokio::select! {
                _ = shutdown.triggered() => break,
                result = tokio::time::timeout(POLL_WAIT, in_flight.next()) => {
                    if let Ok(Some((record, attempt))) = result {
                        remove_pending(&mut pending, &record.url);
                        self.dispatch(&ctx, record, attempt).await;
                    }
                }
            }
        }

        self.drain_on_shutdown(&ctx, in_flight, pending).await;
        log::debug!("fetch worker {worker_id} exiting");
    }

    /// Tops up `in_flight` to `concurrency_per_worker` by pulling one
    /// record at a time off the frontier and running it through the
    /// politeness gate (spec.md §2 control flow: robots, rate limiter,
    /// blacklist, in that order). Deferred records (unknown-robots or
    /// rate-limited) are re-enqueued rather than busy-looped.
    async fn fill(&self, ctx: &Arc<FetchContext>, in_flight: &mut FuturesUnordered<FetchFuture>, pending: &mut Vec<UrlRecord>) {
        let mut deferred = Vec::new();

        while in_flight.len() < self.concurrency_per_worker {
            let batch = ctx.frontier.dequeue_batch(1);
            let Some(record) = batch.into_iter().next() else {
                break;
            };

            match self.admit(ctx, record).await {
                Admission::Go(record) => {
                    pending.push(record.clone());
                    ctx.metrics.active_requests.fetch_add(1, Ordering::Relaxed);
                    in_flight.push(self.spawn_fetch(record));
                }
                Admission::Defer(record) => deferred.push(record),
                Admission::Drop => {}
            }
        }

        if !deferred.is_empty() {
            ctx.frontier.enqueue_bulk(deferred);
        }
    }

    async fn admit(&self, ctx: &Arc<FetchContext>, record: UrlRecord) -> Admission {
        if !ctx.url_filter.is_crawlable(&record.url) {
            ctx.metrics.admissibility_rejections.fetch_add(1, Ordering::Relaxed);
            return Admission::Drop;
        }

        let Ok(parsed) = Url::parse(&record.url) else {
            ctx.metrics.admissibility_rejections.fetch_add(1, Ordering::Relaxed);
            return Admission::Drop;
        };
        let origin = parsed.origin().ascii_serialization();
        let domain = registrable_domain(&record.url);

        if ctx.blacklist.is_blacklisted(&domain) {
            return Admission::Drop;
        }

        if !ctx.metadata.is_ready(&record.url, SystemTime::now()) {
            // Already crawled and not yet due per its backoff schedule
            // (spec.md §4.3 `is_ready`) — dropped rather than deferred,
            // since re-enqueuing would busy-loop until its own next-crawl
            // time arrives; it will surface again via link rediscovery or
            // the next ingest cycle.
            ctx.metrics.not_due_skips.fetch_add(1, Ordering::Relaxed);
            return Admission::Drop;
        }

        match ctx.robots.is_allowed(&origin, parsed.path()).await {
            AllowDecision::Deny => {
                ctx.metrics.robots_denied.fetch_add(1, Ordering::Relaxed);
                Admission::Drop
            }
            AllowDecision::Unknown => Admission::Defer(record),
            AllowDecision::Allow => {
                ctx.rate_limiter.set_min_interval(&domain, ctx.robots.crawl_delay(&origin));
                match ctx.rate_limiter.acquire(&domain, Instant::now()) {
                    None => Admission::Go(record),
                    Some(_wait) => Admission::Defer(record),
                }
            }
        }
    }

    fn spawn_fetch(&self, record: UrlRecord) -> FetchFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let attempt = fetch_bounded(&client, &record.url).await;
            (record, attempt)
        })
    }

    /// Applies spec.md §4.7's completion outcome table.
    async fn dispatch(&self, ctx: &Arc<FetchContext>, record: UrlRecord, attempt: FetchAttempt) {
        ctx.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
        let now = SystemTime::now();
        let domain = registrable_domain(&record.url);

        match attempt {
            FetchAttempt::Response { status, content_type, final_url, body } => {
                ctx.metrics.pages_fetched.fetch_add(1, Ordering::Relaxed);

                match status {
                    200..=299 => {
                        ctx.rate_limiter.record_success(&domain);
                        let is_html = content_type.to_ascii_lowercase().contains("html");
                        let quality = is_html.then(|| HtmlExtractor::prefilter(&body)).flatten();

                        if let Some(filtered) = quality {
                            let hash = content_hash(&body);
                            let links = HtmlExtractor::links(&filtered, &final_url);
                            ctx.metrics.links_discovered.fetch_add(links.len() as u64, Ordering::Relaxed);
                            self.feed_links(ctx, &record, &links).await;

                            let doc = Document {
                                url: record.url.clone(),
                                final_url,
                                status,
                                content_type,
                                body,
                                content_hash: hash.clone(),
                                fetched_at: now,
                                depth: record.depth,
                                referring_domain: record.referring_domain.clone(),
                                extracted_links: links.into_iter().collect::<HashSet<_>>(),
                            };
                            ctx.storage.submit(doc);
                            ctx.metrics.pages_stored.fetch_add(1, Ordering::Relaxed);
                            ctx.metadata.record_success(&record.url, &hash, now, DEFAULT_BASE_INTERVAL).await;
                        } else {
                            // Non-HTML or low quality: reuse the existing hash so the
                            // backoff schedule slows revisiting (spec.md §4.7).
                            let existing = ctx.metadata.get_or_create(&record.url).await;
                            let hash = if existing.content_hash.is_empty() {
                                content_hash(&body)
                            } else {
                                existing.content_hash
                            };
                            ctx.metadata.record_success(&record.url, &hash, now, DEFAULT_BASE_INTERVAL).await;
                        }
                    }
                    401 | 403 => {
                        ctx.metrics.record_failure(FailureClass::Forbidden);
                        ctx.metadata.mark_permanently_discouraged(&record.url, now).await;
                    }
                    429 | 503 => {
                        ctx.metrics.record_failure(FailureClass::RateLimited);
                        ctx.rate_limiter.record_error(&domain, ErrorKind::RateLimited, Instant::now(), &ctx.blacklist);
                        ctx.metadata.record_temporary_failure(&record.url, now).await;
                    }
                    300..=399 | 400..=499 => {
                        ctx.metrics.record_failure(FailureClass::Http);
                        ctx.rate_limiter.record_error(&domain, ErrorKind::Other, Instant::now(), &ctx.blacklist);
                        ctx.metadata.record_temporary_failure(&record.url, now).await;
                    }
                    _ => {
                        ctx.metrics.record_failure(FailureClass::Http);
                        ctx.metadata.record_temporary_failure(&record.url, now).await;
                    }
                }
            }
            FetchAttempt::Error(ErrorSource::Network) => {
                ctx.metrics.record_failure(FailureClass::Network);
                ctx.rate_limiter.record_error(&domain, ErrorKind::Other, Instant::now(), &ctx.blacklist);
                ctx.metadata.record_temporary_failure(&record.url, now).await;
            }
        }
    }

    /// Scores and enqueues discovered links (spec.md §4.7 "Link intake
    /// cap": already bounded to `MAX_LINKS_PER_PAGE` by the extractor).
    async fn feed_links(&self, ctx: &Arc<FetchContext>, parent: &UrlRecord, links: &[String]) {
        let child_depth = parent.depth.saturating_add(1);
        if child_depth > ctx.max_depth {
            return;
        }
        let referring_domain = registrable_domain(&parent.url);
        let records: Vec<UrlRecord> = links
            .iter()
            .filter(|link| ctx.url_filter.is_crawlable(link))
            .map(|link| {
                let priority = ctx.url_filter.priority(link, child_depth);
                UrlRecord::new(link.clone(), priority, child_depth, referring_domain.clone())
            })
            .collect();
        if !records.is_empty() {
            ctx.frontier.enqueue_bulk(records);
        }
    }

    /// On shutdown: stop admitting new work, give in-flight transfers a
    /// short grace period, then spill whatever remains — admitted-but-
    /// unfinished records, plus anything still pending — back to disk for
    /// resumption on restart (spec.md §4.7 "Cancellation").
    async fn drain_on_shutdown(&self, ctx: &Arc<FetchContext>, mut in_flight: FuturesUnordered<FetchFuture>, mut pending: Vec<UrlRecord>) {
        let drain = async {
            while let Some((record, attempt)) = in_flight.next().await {
                remove_pending(&mut pending, &record.url);
                self.dispatch(ctx, record, attempt).await;
            }
        };
        if tokio::time::timeout(WORKER_DRAIN_DEADLINE, drain).await.is_err() {
            log::warn!("fetch worker: drain deadline reached with {} in-flight records outstanding", pending.len());
        }

        // Any transfer that didn't finish in time, plus anything left
        // pending, is handed back to the frontier's own spill path.
        if !pending.is_empty() {
            let n = pending.len();
            if let Err(e) = ctx.frontier.spill_batch(pending) {
                log::error!("fetch worker: failed to spill {n} in-flight records on shutdown: {e}");
            }
        }
    }
}

enum Admission {
    Go(UrlRecord),
    Defer(UrlRecord),
    Drop,
}

fn remove_pending(pending: &mut Vec<UrlRecord>, url: &str) {
    if let Some(idx) = pending.iter().position(|r| r.url == url) {
        pending.remove(idx);
    }
}

/// Performs the GET and reads the body incrementally, stopping once
/// `MAX_BODY_BYTES` has been read (spec.md §4.7 "a body size cap (5 MiB)
/// enforced incrementally").
async fn fetch_bounded(client: &reqwest::Client, url: &str) -> FetchAttempt {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(_) => return FetchAttempt::Error(ErrorSource::Network),
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let final_url = response.url().to_string();

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                body.extend_from_slice(&bytes);
                if body.len() >= MAX_BODY_BYTES {
                    body.truncate(MAX_BODY_BYTES);
                    break;
                }
            }
            Err(_) => return FetchAttempt::Error(ErrorSource::Network),
        }
    }

    FetchAttempt::Response { status, content_type, final_url, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_concurrency_when_zero() {
        let engine = FetchEngine::new("TestBot/1.0", 0).unwrap();
        assert_eq!(engine.concurrency_per_worker, DEFAULT_C_REQ);
    }

    #[test]
    fn remove_pending_removes_first_match_only() {
        let mut pending = vec![
            UrlRecord::new("https://a/".into(), 0.5, 0, "a".into()),
            UrlRecord::new("https://a/".into(), 0.5, 0, "a".into()),
        ];
        remove_pending(&mut pending, "https://a/");
        assert_eq!(pending.len(), 1);
    }
}
