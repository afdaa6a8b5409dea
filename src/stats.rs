//! Pipeline counters.
//!
//! Atomic counters with relaxed ordering; values are eventually consistent.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::ErrorClass;

#[derive(Debug, Default)]
pub struct PipelineStats {
    records_submitted: AtomicU64,
    records_dropped: AtomicU64,
    records_exported: AtomicU64,
    batches_exported: AtomicU64,
    batches_fallback: AtomicU64,
    batches_discarded: AtomicU64,
    last_error: AtomicU8,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submitted(&self) {
        self.records_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of dropped records.
    #[inline]
    pub fn record_dropped(&self, count: u64) -> u64 {
        self.records_dropped.fetch_add(count, Ordering::Relaxed) + count
    }

    #[inline]
    pub fn record_exported(&self, records: usize) {
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.records_exported
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fallback(&self) {
        self.batches_fallback.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discarded(&self) {
        self.batches_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self, class: ErrorClass) {
        self.last_error.store(class.as_u8(), Ordering::Relaxed);
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<ErrorClass> {
        ErrorClass::from_u8(self.last_error.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_submitted: self.records_submitted.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_exported: self.records_exported.load(Ordering::Relaxed),
            batches_exported: self.batches_exported.load(Ordering::Relaxed),
            batches_fallback: self.batches_fallback.load(Ordering::Relaxed),
            batches_discarded: self.batches_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub records_submitted: u64,
    pub records_dropped: u64,
    pub records_exported: u64,
    pub batches_exported: u64,
    pub batches_fallback: u64,
    pub batches_discarded: u64,
}
