//! Minimal HTTP downloader abstraction breaking the fetch-engine /
//! robots-cache / sitemap-ingestor cycle (spec.md §9: "define a minimal
//! trait/interface for 'HTTP downloader'... components depend on the
//! traits, wiring happens in the orchestrator").

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CrawlerError, Result};

pub struct DownloadResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<DownloadResponse>;
}

/// Thin wrapper over a shared `reqwest::Client`, used by `RobotsCache`,
/// `SitemapIngestor`, and `FeedIngestor` — all auxiliary fetchers that need
/// a single GET rather than the `FetchEngine`'s full multiplexed pipeline.
pub struct ReqwestDownloader {
    client: reqwest::Client,
}

impl ReqwestDownloader {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for ReqwestDownloader {
    async fn get(&self, url: &str, timeout: Duration) -> Result<DownloadResponse> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(CrawlerError::Fetch)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(CrawlerError::Fetch)?;
        Ok(DownloadResponse {
            status,
            body: body.to_vec(),
        })
    }
}
