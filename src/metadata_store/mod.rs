//! Per-URL crawl history with async persistence to an embedded SQLite store
//! (spec.md §4.3). The sharded in-memory layer is grounded in the teacher's
//! N-way sharded mutex idiom used elsewhere in the pack (`rate_limiter`,
//! `domain_limiter`); the persistence layer reuses the teacher's
//! `link_index` SQLite-with-WAL pattern.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::UrlMetadata;
use crate::shutdown::ShutdownSignal;
use crate::utils::constants::{METADATA_FLUSH_BATCH, METADATA_FLUSH_INTERVAL, METADATA_SHARDS};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS url_metadata (
    url TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);
"#;

type Shard = Mutex<HashMap<String, UrlMetadata>>;

pub struct MetadataStore {
    shards: Vec<Shard>,
    pool: SqlitePool,
    write_tx: mpsc::UnboundedSender<(String, String)>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, String)>>>,
    persisted_writes: AtomicU64,
    persist_failures: AtomicU64,
}

impl MetadataStore {
    pub async fn open(dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("metadata.sqlite");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| crate::error::CrawlerError::Storage(format!("open metadata store: {e}")))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| crate::error::CrawlerError::Storage(format!("init schema: {e}")))?;

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let shards = (0..METADATA_SHARDS).map(|_| Mutex::new(HashMap::new())).collect();

        Ok(Arc::new(Self {
            shards,
            pool,
            write_tx,
            write_rx: Mutex::new(Some(write_rx)),
            persisted_writes: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }))
    }

    fn shard_for(&self, url: &str) -> &Shard {
        let idx = (xxhash_rust::xxh3::xxh3_64(url.as_bytes()) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Returns an existing in-memory entry, falls through to the KV store,
    /// or creates a fresh record (spec.md §4.3 `get_or_create`).
    pub async fn get_or_create(&self, url: &str) -> UrlMetadata {
        if let Some(existing) = self.shard_for(url).lock().get(url).cloned() {
            return existing;
        }

        if let Ok(Some(meta)) = self.load_from_kv(url).await {
            self.shard_for(url).lock().insert(url.to_string(), meta.clone());
            return meta;
        }

        let fresh = UrlMetadata::fresh(SystemTime::now());
        self.shard_for(url).lock().insert(url.to_string(), fresh.clone());
        self.enqueue_persist(url, &fresh);
        fresh
    }

    async fn load_from_kv(&self, url: &str) -> Result<Option<UrlMetadata>> {
        let row = sqlx::query("SELECT payload FROM url_metadata WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| crate::error::CrawlerError::Storage(format!("read metadata: {e}")))?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                match serde_json::from_str::<UrlMetadata>(&payload) {
                    Ok(meta) => Ok(Some(meta)),
                    Err(e) => {
                        // Corrupt records on startup are treated as missing (spec.md §4.3).
                        log::warn!("{url}: corrupt metadata record, treating as missing: {e}");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    fn enqueue_persist(&self, url: &str, meta: &UrlMetadata) {
        match serde_json::to_string(meta) {
            Ok(payload) => {
                let _ = self.write_tx.send((url.to_string(), payload));
            }
            Err(e) => log::error!("{url}: failed to serialize metadata: {e}"),
        }
    }

    pub async fn record_success(
        &self,
        url: &str,
        new_hash: &str,
        fetched_at: SystemTime,
        base_interval: Duration,
    ) {
        let meta = self.get_or_create(url).await;
        let mut meta = meta;
        meta.record_success(new_hash, fetched_at, base_interval);
        self.shard_for(url).lock().insert(url.to_string(), meta.clone());
        self.enqueue_persist(url, &meta);
    }

    pub async fn record_temporary_failure(&self, url: &str, fetched_at: SystemTime) {
        let mut meta = self.get_or_create(url).await;
        meta.record_temporary_failure(fetched_at);
        self.shard_for(url).lock().insert(url.to_string(), meta.clone());
        self.enqueue_persist(url, &meta);
    }

    pub async fn mark_permanently_discouraged(&self, url: &str, fetched_at: SystemTime) {
        let mut meta = self.get_or_create(url).await;
        meta.mark_permanently_discouraged(fetched_at);
        self.shard_for(url).lock().insert(url.to_string(), meta.clone());
        self.enqueue_persist(url, &meta);
    }

    #[must_use]
    pub fn is_ready(&self, url: &str, now: SystemTime) -> bool {
        self.shard_for(url)
            .lock()
            .get(url)
            .map(|m| m.is_ready(now))
            .unwrap_or(true)
    }

    /// O(N·shard_size) best-effort scan for statistics (spec.md §4.3
    /// `count_ready`).
    #[must_use]
    pub fn count_ready(&self, now: SystemTime) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().values().filter(|m| m.is_ready(now)).count())
            .sum()
    }

    #[must_use]
    pub fn persisted_writes(&self) -> u64 {
        self.persisted_writes.load(Ordering::Relaxed)
    }

    /// Background worker draining the write queue in bounded batches every
    /// `METADATA_FLUSH_INTERVAL` (spec.md §4.3 persistence policy). Drains
    /// fully before returning once `shutdown` fires.
    pub async fn run_persistence_worker(self: Arc<Self>, shutdown: Arc<ShutdownSignal>) {
        let mut rx = match self.write_rx.lock().take() {
            Some(rx) => rx,
            None => {
                log::error!("metadata persistence worker already running");
                return;
            }
        };

        let mut interval = tokio::time::interval(METADATA_FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    self.drain_fully(&mut rx).await;
                    break;
                }
                _ = interval.tick() => {
                    self.flush_batch(&mut rx).await;
                }
            }
        }
    }

    async fn flush_batch(&self, rx: &mut mpsc::UnboundedReceiver<(String, String)>) {
        let mut batch = Vec::with_capacity(METADATA_FLUSH_BATCH);
        while batch.len() < METADATA_FLUSH_BATCH {
            match rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
        if batch.is_empty() {
            return;
        }
        self.write_batch(&batch).await;
    }

    async fn drain_fully(&self, rx: &mut mpsc::UnboundedReceiver<(String, String)>) {
        loop {
            let mut batch = Vec::with_capacity(METADATA_FLUSH_BATCH);
            while batch.len() < METADATA_FLUSH_BATCH {
                match rx.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            self.write_batch(&batch).await;
        }
    }

    async fn write_batch(&self, batch: &[(String, String)]) {
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                log::error!("metadata flush: failed to open transaction: {e}");
                self.persist_failures.fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            }
        };
        for (url, payload) in batch {
            let result = sqlx::query(
                "INSERT INTO url_metadata (url, payload) VALUES (?, ?) \
                 ON CONFLICT(url) DO UPDATE SET payload = excluded.payload",
            )
            .bind(url)
            .bind(payload)
            .execute(&mut *tx)
            .await;
            if let Err(e) = result {
                log::warn!("{url}: metadata flush failed: {e}");
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Err(e) = tx.commit().await {
            log::error!("metadata flush: commit failed: {e}");
            self.persist_failures.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return;
        }
        self.persisted_writes.fetch_add(batch.len() as u64, Ordering::Relaxed);
    }
}
