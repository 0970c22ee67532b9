//! Bounded in-memory priority queue driving all fetching, with predictive
//! async refill from `SpillQueue` (spec.md §4.2).

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::metrics::Metrics;
use crate::model::{EnqueueOutcome, RejectReason, UrlRecord, MAX_URL_LEN};
use crate::shutdown::ShutdownSignal;
use crate::spill_queue::SpillQueue;
use crate::utils::constants::REFILL_INTERVAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrontierPhase {
    Initialising = 0,
    Ready = 1,
    Draining = 2,
    Closed = 3,
}

pub struct Frontier {
    heap: Mutex<BinaryHeap<UrlRecord>>,
    spill: Arc<SpillQueue>,
    capacity: usize,
    low_water: usize,
    refill_batch: usize,
    max_depth: u16,
    phase: AtomicU8,
    metrics: Arc<Metrics>,
}

impl Frontier {
    #[must_use]
    pub fn new(
        spill: Arc<SpillQueue>,
        capacity: usize,
        low_water: usize,
        refill_batch: usize,
        max_depth: u16,
        metrics: Arc<Metrics>,
    ) -> Self {
        let frontier = Self {
            heap: Mutex::new(BinaryHeap::new()),
            spill,
            capacity,
            low_water,
            refill_batch,
            max_depth,
            phase: AtomicU8::new(FrontierPhase::Initialising as u8),
            metrics,
        };
        frontier.phase.store(FrontierPhase::Ready as u8, Ordering::SeqCst);
        frontier
    }

    #[must_use]
    pub fn phase(&self) -> FrontierPhase {
        match self.phase.load(Ordering::SeqCst) {
            0 => FrontierPhase::Initialising,
            1 => FrontierPhase::Ready,
            2 => FrontierPhase::Draining,
            _ => FrontierPhase::Closed,
        }
    }

    pub fn begin_draining(&self) {
        self.phase.store(FrontierPhase::Draining as u8, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.phase.store(FrontierPhase::Closed as u8, Ordering::SeqCst);
    }

    pub fn enqueue(&self, record: UrlRecord) -> EnqueueOutcome {
        self.enqueue_bulk(vec![record]).into_iter().next().unwrap_or(EnqueueOutcome::Rejected(RejectReason::Backpressure))
    }

    /// Batched enqueue with a single spill decision covering the whole
    /// batch (spec.md §4.2 `enqueue_bulk`).
    pub fn enqueue_bulk(&self, records: Vec<UrlRecord>) -> Vec<EnqueueOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut admissible = Vec::with_capacity(records.len());

        for record in records {
            if record.url.len() > MAX_URL_LEN {
                outcomes.push(EnqueueOutcome::Rejected(RejectReason::UrlTooLong));
            } else if record.depth > self.max_depth {
                outcomes.push(EnqueueOutcome::Rejected(RejectReason::DepthCapExceeded));
            } else {
                admissible.push(record);
            }
        }

        if admissible.is_empty() {
            return outcomes;
        }

        let mut heap = self.heap.lock();
        let mut accepted_marks = vec![EnqueueOutcome::Accepted; admissible.len()];
        for record in admissible.iter().cloned() {
            heap.push(record);
        }

        if heap.len() > self.capacity {
            let overflow = heap.len() - self.capacity;
            let mut to_spill = Vec::with_capacity(overflow);
            for _ in 0..overflow {
                if let Some(lowest) = pop_lowest(&mut heap) {
                    to_spill.push(lowest);
                }
            }
            drop(heap);

            match self.spill.push_batch(to_spill.clone()) {
                Ok(()) => {
                    let spilled_urls: std::collections::HashSet<&str> =
                        to_spill.iter().map(|r| r.url.as_str()).collect();
                    for (mark, record) in accepted_marks.iter_mut().zip(admissible.iter()) {
                        if spilled_urls.contains(record.url.as_str()) {
                            *mark = EnqueueOutcome::Spilled;
                        }
                    }
                }
                Err(e) => {
                    log::error!("spill push_batch failed, re-admitting records in memory: {e}");
                    let mut heap = self.heap.lock();
                    for record in to_spill {
                        heap.push(record);
                    }
                    // Spill failed: treat as backpressure only if we are still over
                    // capacity after re-admitting (capacity is a soft bound under failure).
                    if heap.len() > self.capacity {
                        for mark in &mut accepted_marks {
                            *mark = EnqueueOutcome::Rejected(RejectReason::Backpressure);
                        }
                    }
                }
            }
        }

        outcomes.extend(accepted_marks);
        outcomes
    }

    /// Removes up to `max` highest-priority records. Never blocks.
    pub fn dequeue_batch(&self, max: usize) -> Vec<UrlRecord> {
        let mut heap = self.heap.lock();
        let mut out = Vec::with_capacity(max.min(heap.len()));
        for _ in 0..max {
            match heap.pop() {
                Some(record) => out.push(record),
                None => break,
            }
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn approx_total(&self) -> u64 {
        self.len() as u64 + self.spill.size()
    }

    /// Spills the entire in-memory contents; used during orchestrator
    /// shutdown (spec.md §4.11 step 3).
    pub fn spill_all(&self) -> crate::error::Result<usize> {
        let drained: Vec<UrlRecord> = {
            let mut heap = self.heap.lock();
            std::mem::take(&mut *heap).into_sorted_vec()
        };
        let count = drained.len();
        self.spill.push_batch(drained)?;
        Ok(count)
    }

    /// Background task maintaining the low-water mark by pulling batches
    /// from `SpillQueue` (spec.md §4.2 "Predictive refill task").
    pub async fn run_refill_task(self: Arc<Self>, shutdown: Arc<ShutdownSignal>) {
        let mut interval = tokio::time::interval(REFILL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = interval.tick() => {}
            }
            if self.phase() != FrontierPhase::Ready {
                continue;
            }
            if self.len() >= self.low_water {
                continue;
            }
            match self.spill.pop_batch(self.refill_batch) {
                Ok(batch) if !batch.is_empty() => {
                    let n = batch.len();
                    self.admit_refilled(batch);
                    log::debug!("frontier refill: pulled {n} records from spill");
                }
                Ok(_) => {}
                Err(e) => log::warn!("frontier refill pop_batch failed: {e}"),
            }
        }
    }

    /// Re-admits records already counted against capacity by a prior spill
    /// — no further spill check is applied (spec.md §4.2).
    fn admit_refilled(&self, records: Vec<UrlRecord>) {
        let mut heap = self.heap.lock();
        for record in records {
            heap.push(record);
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Spills `records` directly to the backing `SpillQueue`, bypassing the
    /// in-memory heap. Used by the fetch engine to persist in-flight URLs
    /// that were cancelled at shutdown (spec.md §4.7 "Cancellation").
    pub fn spill_batch(&self, records: Vec<UrlRecord>) -> crate::error::Result<()> {
        self.spill.push_batch(records)
    }
}

fn pop_lowest(heap: &mut BinaryHeap<UrlRecord>) -> Option<UrlRecord> {
    // BinaryHeap is a max-heap; finding the minimum requires a linear scan.
    // Acceptable here: this path only runs while at/above capacity, and the
    // `B_spill` count is small relative to `C_mem`.
    if heap.is_empty() {
        return None;
    }
    let items: Vec<UrlRecord> = std::mem::take(heap).into_vec();
    let (min_idx, _) = items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .expect("non-empty");
    let mut items = items;
    let lowest = items.remove(min_idx);
    *heap = items.into_iter().collect();
    Some(lowest)
}

pub fn shutdown_phase_delay() -> Duration {
    Duration::from_millis(50)
}
