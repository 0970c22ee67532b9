use std::time::SystemTime;

/// A single enqueued work item (spec.md §3 "UrlRecord").
///
/// Owned exclusively by whichever of `Frontier`, `SpillQueue`, or an
/// in-flight fetch currently holds it — transfer between components is
/// always a move, never a shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub url: String,
    pub priority: f32,
    pub depth: u16,
    pub referring_domain: String,
    pub discovered_at: SystemTime,
}

impl UrlRecord {
    #[must_use]
    pub fn new(url: String, priority: f32, depth: u16, referring_domain: String) -> Self {
        Self {
            url,
            priority: priority.clamp(0.0, 1.0),
            depth,
            referring_domain,
            discovered_at: SystemTime::now(),
        }
    }
}

/// Priority-descending ordering, ties broken by ascending depth (prefer
/// shallower), then by discovery time (FIFO) — spec.md §4.2.
impl Eq for UrlRecord {}

impl PartialOrd for UrlRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UrlRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.discovered_at.cmp(&self.discovered_at))
    }
}

/// Result of `Frontier::enqueue` (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Spilled,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UrlTooLong,
    DepthCapExceeded,
    Backpressure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn priority_descending_depth_ascending() {
        let mut heap = BinaryHeap::new();
        heap.push(UrlRecord::new("https://a/".into(), 0.5, 2, "a".into()));
        heap.push(UrlRecord::new("https://b/".into(), 0.9, 5, "b".into()));
        heap.push(UrlRecord::new("https://c/".into(), 0.5, 1, "c".into()));

        assert_eq!(heap.pop().unwrap().url, "https://b/");
        assert_eq!(heap.pop().unwrap().url, "https://c/");
        assert_eq!(heap.pop().unwrap().url, "https://a/");
    }
}
