use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    docs_read: AtomicU64,
    docs_dispatched: AtomicU64,
    docs_skipped: AtomicU64,
    bytes_dispatched: AtomicU64,
    batches_dispatched: AtomicU64,
    shards_completed: AtomicU64,
    failure_count: AtomicU64,
}

/// Cheap, cloneable per-process counters for the migration pipeline.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub docs_read: u64,
    pub docs_dispatched: u64,
    pub docs_skipped: u64,
    pub bytes_dispatched: u64,
    pub batches_dispatched: u64,
    pub shards_completed: u64,
    pub failure_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_docs_read(&self, count: u64) {
        self.inner.docs_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_docs_dispatched(&self, count: u64) {
        self.inner
            .docs_dispatched
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_docs_skipped(&self, count: u64) {
        self.inner.docs_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bytes_dispatched(&self, count: u64) {
        self.inner
            .bytes_dispatched
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_dispatched
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_shards_completed(&self, count: u64) {
        self.inner
            .shards_completed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            docs_read: self.inner.docs_read.load(Ordering::Relaxed),
            docs_dispatched: self.inner.docs_dispatched.load(Ordering::Relaxed),
            docs_skipped: self.inner.docs_skipped.load(Ordering::Relaxed),
            bytes_dispatched: self.inner.bytes_dispatched.load(Ordering::Relaxed),
            batches_dispatched: self.inner.batches_dispatched.load(Ordering::Relaxed),
            shards_completed: self.inner.shards_completed.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
        }
    }
}
