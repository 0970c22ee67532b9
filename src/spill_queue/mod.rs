//! Sharded durable overflow store for the URL frontier (spec.md §4.1).
//!
//! Shards are independent append-only files, each owned by its own
//! [`SpillShard`]; there is no cross-shard ordering guarantee, only FIFO
//! within a shard. `SpillQueue` itself only routes records to shards and
//! tracks an approximate size.

mod codec;
mod shard;

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::Result;
use crate::model::UrlRecord;
use crate::utils::constants::DEFAULT_SPILL_SHARDS;

use shard::SpillShard;

pub struct SpillQueue {
    shards: Vec<SpillShard>,
    pushed: AtomicU64,
    popped: AtomicU64,
    next_pop_shard: AtomicUsize,
}

impl SpillQueue {
    /// Opens (creating if absent) `shard_count` shard files under `dir`. Each
    /// shard's persisted read cursor is honoured, and the unconsumed record
    /// count left over from a prior run is counted once here so `size()`
    /// stays accurate immediately after a restart rather than reporting
    /// zero until fresh pushes arrive.
    pub fn open(dir: &Path, shard_count: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let shard_count = if shard_count == 0 { DEFAULT_SPILL_SHARDS } else { shard_count };
        let mut shards = Vec::with_capacity(shard_count);
        let mut carried_over = 0u64;
        for i in 0..shard_count {
            let shard = SpillShard::open(dir.join(format!("shard_{i}.log")))?;
            carried_over += shard.count_unconsumed()?;
            shards.push(shard);
        }
        Ok(Self {
            shards,
            pushed: AtomicU64::new(carried_over),
            popped: AtomicU64::new(0),
            next_pop_shard: AtomicUsize::new(0),
        })
    }

    fn shard_index(&self, url: &str) -> usize {
        (xxhash_rust::xxh3::xxh3_64(url.as_bytes()) % self.shards.len() as u64) as usize
    }

    /// Appends `records`, grouping by `hash(url) mod K` and writing one
    /// framed batch per shard. On a shard write failure, already-written
    /// shards keep their data; the caller retains `records` to retry
    /// (spec.md §4.1: "the caller retains the records to retry").
    pub fn push_batch(&self, records: Vec<UrlRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut by_shard: Vec<Vec<UrlRecord>> = (0..self.shards.len()).map(|_| Vec::new()).collect();
        for record in records {
            let idx = self.shard_index(&record.url);
            by_shard[idx].push(record);
        }
        let mut total = 0u64;
        for (shard, bucket) in self.shards.iter().zip(by_shard.into_iter()) {
            if bucket.is_empty() {
                continue;
            }
            total += bucket.len() as u64;
            shard.push(&bucket)?;
        }
        self.pushed.fetch_add(total, Ordering::Relaxed);
        Ok(())
    }

    /// Draws whole batches round-robin across shards until at least
    /// `limit` records have been collected or every shard is drained for
    /// this call.
    pub fn pop_batch(&self, limit: usize) -> Result<Vec<UrlRecord>> {
        let mut out = Vec::new();
        if limit == 0 || self.shards.is_empty() {
            return Ok(out);
        }
        let shard_count = self.shards.len();
        let start = self.next_pop_shard.fetch_add(1, Ordering::Relaxed) % shard_count;

        for offset in 0..shard_count {
            if out.len() >= limit {
                break;
            }
            let idx = (start + offset) % shard_count;
            if let Some(batch) = self.shards[idx].pop_next_batch()? {
                self.popped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                out.extend(batch);
            }
        }
        Ok(out)
    }

    /// Best-effort lower bound on the number of unread records (spec.md
    /// §4.1: "a best-effort lower bound (approximate)").
    pub fn size(&self) -> u64 {
        self.pushed
            .load(Ordering::Relaxed)
            .saturating_sub(self.popped.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<UrlRecord> {
        (0..n)
            .map(|i| UrlRecord::new(format!("https://example.test/page{i}"), 0.5, 0, "example.test".into()))
            .collect()
    }

    #[test]
    fn push_then_pop_recovers_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpillQueue::open(dir.path(), 4).unwrap();
        queue.push_batch(sample(1000)).unwrap();
        assert!(queue.size() > 0);

        let mut recovered = Vec::new();
        loop {
            let batch = queue.pop_batch(200).unwrap();
            if batch.is_empty() {
                break;
            }
            recovered.extend(batch);
        }
        assert_eq!(recovered.len(), 1000);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn restart_recovers_unread_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = SpillQueue::open(dir.path(), 4).unwrap();
            queue.push_batch(sample(50)).unwrap();
        }
        let reopened = SpillQueue::open(dir.path(), 4).unwrap();
        let mut recovered = Vec::new();
        loop {
            let batch = reopened.pop_batch(10).unwrap();
            if batch.is_empty() {
                break;
            }
            recovered.extend(batch);
        }
        assert_eq!(recovered.len(), 50);
    }

    #[test]
    fn restart_after_partial_pop_does_not_redeliver_and_size_is_accurate() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = SpillQueue::open(dir.path(), 4).unwrap();
            queue.push_batch(sample(50)).unwrap();
            let first = queue.pop_batch(20).unwrap();
            assert_eq!(first.len(), 20);
        }
        let reopened = SpillQueue::open(dir.path(), 4).unwrap();
        assert_eq!(reopened.size(), 30);

        let mut recovered = Vec::new();
        loop {
            let batch = reopened.pop_batch(10).unwrap();
            if batch.is_empty() {
                break;
            }
            recovered.extend(batch);
        }
        assert_eq!(recovered.len(), 30);
        assert_eq!(reopened.size(), 0);
    }
}
