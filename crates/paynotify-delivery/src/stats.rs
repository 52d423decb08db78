//! Delivery counters shared by the queue, workers and retry scheduler.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time view of engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Number of running delivery workers.
    pub active_workers: usize,
    /// Jobs accepted into the queue, resubmissions included.
    pub submitted: u64,
    /// Jobs turned away at the queue (full or shut down).
    pub rejected: u64,
    /// HTTP attempts started.
    pub attempts: u64,
    /// Jobs delivered successfully.
    pub delivered: u64,
    /// Jobs ended by a fatal error.
    pub failed: u64,
    /// Jobs that used up their attempt budget.
    pub exhausted: u64,
    /// Retry timers armed since startup.
    pub retries_scheduled: u64,
    /// Retry timers currently armed.
    pub pending_retries: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    active_workers: AtomicUsize,
    submitted: AtomicU64,
    rejected: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    retries_scheduled: AtomicU64,
    pending_retries: AtomicUsize,
}

impl StatsRecorder {
    pub(crate) fn set_active_workers(&self, count: usize) {
        self.active_workers.store(count, Ordering::Relaxed);
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry_armed(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        self.pending_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry_disarmed(&self) {
        self.pending_retries.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            active_workers: self.active_workers.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            pending_retries: self.pending_retries.load(Ordering::Relaxed),
            queued: 0,
        }
    }
}
