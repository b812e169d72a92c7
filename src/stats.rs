//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The lock-free structures elsewhere in
//! the crate provide the ordering guarantees for correctness; these counters
//! are purely for monitoring.

use core::sync::atomic::{AtomicU64, Ordering};

pub struct Stats {
    alloc_count: AtomicU64,
    free_count: AtomicU64,
    size_cache_hits: AtomicU64,
    span_cache_hits: AtomicU64,
    global_cache_hits: AtomicU64,
    os_maps: AtomicU64,
    os_mapped_pages: AtomicU64,
    os_unmaps: AtomicU64,
    os_unmapped_pages: AtomicU64,
    span_cache_spills: AtomicU64,
    heap_adoptions: AtomicU64,
    heap_creations: AtomicU64,
    deferred_free_drains: AtomicU64,
}

/// Point-in-time copy of every counter, returned by [`Stats::snapshot`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub free_count: u64,
    pub size_cache_hits: u64,
    pub span_cache_hits: u64,
    pub global_cache_hits: u64,
    pub os_maps: u64,
    pub os_mapped_pages: u64,
    pub os_unmaps: u64,
    pub os_unmapped_pages: u64,
    pub span_cache_spills: u64,
    pub heap_adoptions: u64,
    pub heap_creations: u64,
    pub deferred_free_drains: u64,
}

impl Stats {
    pub const fn new() -> Self {
        Stats {
            alloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            size_cache_hits: AtomicU64::new(0),
            span_cache_hits: AtomicU64::new(0),
            global_cache_hits: AtomicU64::new(0),
            os_maps: AtomicU64::new(0),
            os_mapped_pages: AtomicU64::new(0),
            os_unmaps: AtomicU64::new(0),
            os_unmapped_pages: AtomicU64::new(0),
            span_cache_spills: AtomicU64::new(0),
            heap_adoptions: AtomicU64::new(0),
            heap_creations: AtomicU64::new(0),
            deferred_free_drains: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_alloc_hit(&self) {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        self.size_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_span_cache_hit(&self) {
        self.span_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_global_cache_hit(&self) {
        self.global_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_os_map(&self, pages: usize) {
        self.os_maps.fetch_add(1, Ordering::Relaxed);
        self.os_mapped_pages
            .fetch_add(pages as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_os_unmap(&self, pages: usize) {
        self.os_unmaps.fetch_add(1, Ordering::Relaxed);
        self.os_unmapped_pages
            .fetch_add(pages as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_span_cache_spill(&self, count: usize) {
        self.span_cache_spills
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heap_adoption(&self) {
        self.heap_adoptions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heap_creation(&self) {
        self.heap_creations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deferred_free_drain(&self) {
        self.deferred_free_drains.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
            size_cache_hits: self.size_cache_hits.load(Ordering::Relaxed),
            span_cache_hits: self.span_cache_hits.load(Ordering::Relaxed),
            global_cache_hits: self.global_cache_hits.load(Ordering::Relaxed),
            os_maps: self.os_maps.load(Ordering::Relaxed),
            os_mapped_pages: self.os_mapped_pages.load(Ordering::Relaxed),
            os_unmaps: self.os_unmaps.load(Ordering::Relaxed),
            os_unmapped_pages: self.os_unmapped_pages.load(Ordering::Relaxed),
            span_cache_spills: self.span_cache_spills.load(Ordering::Relaxed),
            heap_adoptions: self.heap_adoptions.load(Ordering::Relaxed),
            heap_creations: self.heap_creations.load(Ordering::Relaxed),
            deferred_free_drains: self.deferred_free_drains.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_events() {
        let stats = Stats::new();
        stats.record_alloc_hit();
        stats.record_os_map(4);
        let snap = stats.snapshot();
        assert_eq!(snap.alloc_count, 1);
        assert_eq!(snap.size_cache_hits, 1);
        assert_eq!(snap.os_maps, 1);
        assert_eq!(snap.os_mapped_pages, 4);
    }
}
