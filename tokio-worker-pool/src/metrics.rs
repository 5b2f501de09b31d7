//! Counters describing worker churn and job throughput of a [`crate::WorkerPool`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time snapshot of a pool's counters. See [`crate::WorkerPool::metrics`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub workers_spawned: u64,
    pub workers_retired: u64,
    pub workers_crashed: u64,
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    /// Highest number of simultaneously running jobs observed so far.
    pub peak_busy: usize,
}

pub(crate) struct MetricsStorage {
    workers_spawned: AtomicU64,
    workers_retired: AtomicU64,
    workers_crashed: AtomicU64,
    jobs_dispatched: AtomicU64,
    jobs_completed: AtomicU64,
    peak_busy: AtomicUsize,
}

impl MetricsStorage {
    pub(crate) const fn new_const() -> Self {
        MetricsStorage {
            workers_spawned: AtomicU64::new(0),
            workers_retired: AtomicU64::new(0),
            workers_crashed: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            peak_busy: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_retired(&self) {
        self.workers_retired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_crashed(&self) {
        self.workers_crashed.fetch_add(1, Ordering::Relaxed);
    }

    /// `busy` is the number of running jobs including the one just dispatched.
    pub(crate) fn record_dispatch(&self, busy: usize) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        self.peak_busy.fetch_max(busy, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn make_pub(&self) -> Metrics {
        Metrics {
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
            workers_crashed: self.workers_crashed.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            peak_busy: self.peak_busy.load(Ordering::Relaxed),
        }
    }
}
