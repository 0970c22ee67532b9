//! Process-wide shutdown signal shared by every background task (refill,
//! ingestors, persistence worker, fetch workers). Generalizes the teacher's
//! `crawl_events::bus` shutdown-flag-plus-`Notify` idiom into a standalone
//! type usable outside the event bus.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct ShutdownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: safe to call more than once, and from any clone/Arc holder.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger` has been called. Background loops select!
    /// this against their own work future to exit promptly.
    pub async fn triggered(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn triggered_wakes_waiters() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.triggered().await;
        });
        signal.trigger();
        handle.await.unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn already_triggered_resolves_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.triggered().await;
    }
}
