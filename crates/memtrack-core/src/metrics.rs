//! Atomic counters for tracker observability.
//!
//! All counters use relaxed ordering. They are diagnostic, not
//! synchronization primitives; the table lock orders the real state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-tracker operation counters.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Successful tracked allocations.
    pub allocations: AtomicU64,
    /// Successful tracked frees.
    pub frees: AtomicU64,
    /// Zero-byte requests rejected.
    pub zero_size_rejections: AtomicU64,
    /// Frees of a null handle.
    pub null_frees: AtomicU64,
    /// Allocations refused because every slot was occupied.
    pub exhaustion_failures: AtomicU64,
    /// Frees of handles not in the table (never tracked or already freed).
    pub untracked_frees: AtomicU64,
    /// Untracked frees the backing allocator refused to release.
    pub refused_releases: AtomicU64,
    /// Allocations at or above the large-allocation threshold.
    pub large_allocations: AtomicU64,
    /// Backing allocator failures.
    pub backing_failures: AtomicU64,
    /// Diagnostics that could not be written to the sink.
    pub dropped_diagnostics: AtomicU64,
    /// High-water mark of `total_bytes`.
    pub peak_bytes: AtomicU64,
    /// High-water mark of `occupied_count`.
    pub peak_occupied: AtomicU64,
}

impl TrackerMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            zero_size_rejections: AtomicU64::new(0),
            null_frees: AtomicU64::new(0),
            exhaustion_failures: AtomicU64::new(0),
            untracked_frees: AtomicU64::new(0),
            refused_releases: AtomicU64::new(0),
            large_allocations: AtomicU64::new(0),
            backing_failures: AtomicU64::new(0),
            dropped_diagnostics: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            peak_occupied: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise a high-water mark to `value` if it is higher.
    pub fn raise(counter: &AtomicU64, value: usize) {
        counter.fetch_max(value as u64, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            frees: Self::get(&self.frees),
            zero_size_rejections: Self::get(&self.zero_size_rejections),
            null_frees: Self::get(&self.null_frees),
            exhaustion_failures: Self::get(&self.exhaustion_failures),
            untracked_frees: Self::get(&self.untracked_frees),
            refused_releases: Self::get(&self.refused_releases),
            large_allocations: Self::get(&self.large_allocations),
            backing_failures: Self::get(&self.backing_failures),
            dropped_diagnostics: Self::get(&self.dropped_diagnostics),
            peak_bytes: Self::get(&self.peak_bytes),
            peak_occupied: Self::get(&self.peak_occupied),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub frees: u64,
    pub zero_size_rejections: u64,
    pub null_frees: u64,
    pub exhaustion_failures: u64,
    pub untracked_frees: u64,
    pub refused_releases: u64,
    pub large_allocations: u64,
    pub backing_failures: u64,
    pub dropped_diagnostics: u64,
    pub peak_bytes: u64,
    pub peak_occupied: u64,
}
