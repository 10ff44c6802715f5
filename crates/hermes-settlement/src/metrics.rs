use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Settler counters, updated lock-free.
#[derive(Debug, Default)]
pub struct SettlerMetrics {
    promise_events: AtomicU64,
    settlements_enqueued: AtomicU64,
    settlements_succeeded: AtomicU64,
    settlements_failed: AtomicU64,
    history_failures: AtomicU64,
}

/// Point-in-time copy of [`SettlerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Promise events addressed to this hermes, including untracked identities.
    pub promise_events: u64,
    pub settlements_enqueued: u64,
    pub settlements_succeeded: u64,
    pub settlements_failed: u64,
    pub history_failures: u64,
}

impl SettlerMetrics {
    pub fn promise_event(&self) {
        self.promise_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_enqueued(&self) {
        self.settlements_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_succeeded(&self) {
        self.settlements_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_failed(&self) {
        self.settlements_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_failed(&self) {
        self.history_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            promise_events: self.promise_events.load(Ordering::Relaxed),
            settlements_enqueued: self.settlements_enqueued.load(Ordering::Relaxed),
            settlements_succeeded: self.settlements_succeeded.load(Ordering::Relaxed),
            settlements_failed: self.settlements_failed.load(Ordering::Relaxed),
            history_failures: self.history_failures.load(Ordering::Relaxed),
        }
    }
}
