//! Crawler configuration: CLI args, environment variables, and the JSON
//! array files under `CRAWLER_CONFIG_DIR` (spec.md §6).
//!
//! Unlike the teacher's chromiumoxide-oriented typestate builder, `Config`
//! is loaded wholesale at startup and handed to components as an owned
//! value (or `Arc<Config>`) — there's no fluent construction step to guard
//! with typestates here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CrawlerError, Result};
use crate::utils::constants::{DEFAULT_C_MEM, DEFAULT_MAX_DEPTH, DEFAULT_USER_AGENT};

/// A named feed or sitemap seed with its own crawl priority (spec.md §6:
/// "feeds/sitemaps may be objects with `{ "url": "...", "priority": float }`").
#[derive(Debug, Clone, Deserialize)]
pub struct PrioritizedUrl {
    pub url: String,
    #[serde(default = "default_priority")]
    pub priority: f32,
}

fn default_priority() -> f32 {
    0.5
}

/// Fully resolved crawler configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub threads: usize,
    pub max_depth: u16,
    pub max_queue_size: usize,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub max_pages: Option<u64>,

    pub excluded_extensions: Vec<String>,
    pub excluded_patterns: Vec<String>,
    pub high_priority_domains: Vec<String>,
    pub seeds: Vec<String>,
    pub feeds: Vec<PrioritizedUrl>,
    pub sitemaps: Vec<PrioritizedUrl>,

    /// Whole-process shutdown deadline (spec.md §9 open question: this was
    /// hard-coded in the source; the rewrite exposes it via env var).
    pub shutdown_deadline: Duration,
    /// `StorageSink` drain deadline on shutdown (same open question).
    pub storage_flush_deadline: Duration,
}

impl Config {
    /// Builds configuration from CLI args, environment, and the config
    /// directory's JSON files. `args` is the process's positional argument
    /// list (excluding argv[0]): `<threads> [max_depth] [max_queue_size]`.
    pub fn load(args: &[String]) -> Result<Self> {
        let threads = args
            .first()
            .ok_or_else(|| CrawlerError::Config("missing required <threads> argument".into()))?
            .parse::<usize>()
            .map_err(|e| CrawlerError::Config(format!("invalid <threads>: {e}")))?;
        if threads == 0 {
            return Err(CrawlerError::Config("<threads> must be >= 1".into()));
        }

        let max_depth = match args.get(1) {
            Some(s) => s
                .parse::<u16>()
                .map_err(|e| CrawlerError::Config(format!("invalid [max_depth]: {e}")))?,
            None => DEFAULT_MAX_DEPTH,
        };

        let max_queue_size = match args.get(2) {
            Some(s) => s
                .parse::<usize>()
                .map_err(|e| CrawlerError::Config(format!("invalid [max_queue_size]: {e}")))?,
            None => DEFAULT_C_MEM,
        };

        let config_dir = std::env::var("CRAWLER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config"));
        let data_dir = std::env::var("CRAWLER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let user_agent =
            std::env::var("CRAWLER_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
        let max_pages = std::env::var("CRAWLER_MAX_PAGES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok());

        let shutdown_deadline = env_duration_secs(
            "CRAWLER_SHUTDOWN_DEADLINE_SECS",
            crate::utils::constants::SHUTDOWN_DEADLINE,
        );
        let storage_flush_deadline = env_duration_secs(
            "CRAWLER_STORAGE_FLUSH_DEADLINE_SECS",
            crate::utils::constants::STORAGE_SHUTDOWN_DEADLINE,
        );

        std::fs::create_dir_all(&data_dir)
            .map_err(|e| CrawlerError::FatalInit(format!("data dir {}: {e}", data_dir.display())))?;

        let excluded_extensions = load_string_array(&config_dir, "excluded_extensions.json");
        let excluded_patterns = load_string_array(&config_dir, "excluded_patterns.json");
        let high_priority_domains = load_string_array(&config_dir, "high_priority_domains.json");
        let seeds = load_string_array(&config_dir, "seeds.json");
        let feeds = load_prioritized_array(&config_dir, "feeds.json");
        let sitemaps = load_prioritized_array(&config_dir, "sitemaps.json");

        Ok(Self {
            threads,
            max_depth,
            max_queue_size,
            config_dir,
            data_dir,
            user_agent,
            max_pages,
            excluded_extensions,
            excluded_patterns,
            high_priority_domains,
            seeds,
            feeds,
            sitemaps,
            shutdown_deadline,
            storage_flush_deadline,
        })
    }

    #[must_use]
    pub fn spill_dir(&self) -> PathBuf {
        self.data_dir.join("frontier_spill")
    }

    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata.kv")
    }

    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    #[must_use]
    pub fn crawl_log_path(&self) -> PathBuf {
        self.data_dir.join("crawl_log.csv")
    }

    #[must_use]
    pub fn shutdown_deadline(&self) -> Duration {
        self.shutdown_deadline
    }
}

/// Reads an integer-seconds override from the environment, falling back to
/// `default` if unset or unparsable.
fn env_duration_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Reads a JSON array of strings, degrading to an empty vector with a
/// warning if the file is missing or malformed (spec.md §6).
fn load_string_array(config_dir: &Path, file_name: &str) -> Vec<String> {
    let path = config_dir.join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
            Ok(values) => values,
            Err(e) => {
                log::warn!("{}: malformed JSON array, using empty set: {e}", path.display());
                Vec::new()
            }
        },
        Err(e) => {
            log::warn!("{}: not readable, using empty set: {e}", path.display());
            Vec::new()
        }
    }
}

/// Reads a JSON array of either bare URL strings or `{url, priority}`
/// objects (spec.md §6 feeds/sitemaps format).
fn load_prioritized_array(config_dir: &Path, file_name: &str) -> Vec<PrioritizedUrl> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Plain(String),
        Full(PrioritizedUrl),
    }

    let path = config_dir.join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<Vec<Entry>>(&text) {
            Ok(entries) => entries
                .into_iter()
                .map(|e| match e {
                    Entry::Plain(url) => PrioritizedUrl {
                        url,
                        priority: default_priority(),
                    },
                    Entry::Full(p) => p,
                })
                .collect(),
            Err(e) => {
                log::warn!("{}: malformed JSON array, using empty set: {e}", path.display());
                Vec::new()
            }
        },
        Err(e) => {
            log::warn!("{}: not readable, using empty set: {e}", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_threads() {
        let err = Config::load(&[]).unwrap_err();
        assert!(matches!(err, CrawlerError::Config(_)));
    }

    #[test]
    fn rejects_zero_threads() {
        let err = Config::load(&["0".to_string()]).unwrap_err();
        assert!(matches!(err, CrawlerError::Config(_)));
    }

    #[test]
    fn missing_config_files_degrade_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        std::env::set_var("CRAWLER_CONFIG_DIR", dir.path());
        std::env::set_var("CRAWLER_DATA_DIR", data_dir.path());
        let cfg = Config::load(&["4".to_string()]).unwrap();
        assert!(cfg.seeds.is_empty());
        assert!(cfg.feeds.is_empty());
        assert_eq!(cfg.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn parses_mixed_prioritized_array() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sitemaps.json"),
            r#"["https://a.test/s.xml", {"url": "https://b.test/s.xml", "priority": 0.9}]"#,
        )
        .unwrap();
        let parsed = load_prioritized_array(dir.path(), "sitemaps.json");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].priority, default_priority());
        assert_eq!(parsed[1].priority, 0.9);
    }
}
