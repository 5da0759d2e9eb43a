//! # Load Metrics
//!
//! Running counters updated from the fault handler. Atomics only: the
//! handler runs in signal context.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Fault, page and fragmentation counters
#[derive(Debug, Default)]
pub struct LoadMetrics {
    /// Faults resolved to a segment
    faults: AtomicU64,
    /// Pages materialized
    page_allocations: AtomicU64,
    /// Unused bytes in segments' final pages
    fragmentation: AtomicU64,
}

impl LoadMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            faults: AtomicU64::new(0),
            page_allocations: AtomicU64::new(0),
            fragmentation: AtomicU64::new(0),
        }
    }

    /// Record a handled fault
    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a materialized page
    pub fn record_page_allocation(&self) {
        self.page_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `bytes` of internal fragmentation, returning the new total
    pub fn record_fragmentation(&self, bytes: u64) -> u64 {
        self.fragmentation.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    /// Get handled faults
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Get materialized pages
    pub fn page_allocations(&self) -> u64 {
        self.page_allocations.load(Ordering::Relaxed)
    }

    /// Get fragmentation in bytes
    pub fn fragmentation_bytes(&self) -> u64 {
        self.fragmentation.load(Ordering::Relaxed)
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            faults: self.faults(),
            page_allocations: self.page_allocations(),
            fragmentation_bytes: self.fragmentation_bytes(),
        }
    }
}

/// Point-in-time copy of [`LoadMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Faults resolved to a segment
    pub faults: u64,
    /// Pages materialized
    pub page_allocations: u64,
    /// Internal fragmentation in bytes
    pub fragmentation_bytes: u64,
}

impl MetricsSnapshot {
    /// Fragmentation in whole KiB
    pub fn fragmentation_kib(&self) -> u64 {
        self.fragmentation_bytes / 1024
    }

    /// Emit the final totals
    pub fn log_summary(&self) {
        log::info!("Total page faults: {}", self.faults);
        log::info!("Total page allocations: {}", self.page_allocations);
        log::info!("Internal fragmentation: {} KB", self.fragmentation_kib());
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "faults={} pages={} fragmentation={}B",
            self.faults, self.page_allocations, self.fragmentation_bytes
        )
    }
}
