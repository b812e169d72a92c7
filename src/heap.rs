//! Per-thread heap: the structure a thread allocates and frees through
//! directly, without taking a lock on the hot path.
//!
//! A heap owns a size-class-indexed list of partially-used spans (blocks
//! still available without mapping anything new), a page-count-indexed
//! cache of fully-free spans ready to be recarved for a different class,
//! and an inbox other threads push freed blocks into when they don't own
//! the span themselves.

use crate::config::{MAX_PAGE_COUNT, NUM_SIZE_CLASSES, THREAD_SPAN_CACHE_LIMIT};
use crate::global_cache::GlobalCache;
use crate::platform::{self, MapError};
use crate::registry::Registry;
use crate::size_class::{self, SizeClassInfo};
use crate::span::{self, SpanHeader, SpanList};
use crate::stats::Stats;
use crate::sync::TreiberStack;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Verbose span-lifecycle tracing, compiled in only under `features =
/// ["debug"]`.
macro_rules! span_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "debug")]
        {
            log::trace!($($arg)*);
        }
    }};
}

pub struct Heap {
    pub(crate) id: u32,
    pub(crate) next_in_bucket: AtomicUsize,
    pub(crate) next_orphan: AtomicUsize,
    size_cache: [SpanList; NUM_SIZE_CLASSES],
    span_cache: [SpanList; MAX_PAGE_COUNT + 1],
    deferred_free: TreiberStack,
}

/// Pushed by a non-owner thread's `deallocate`, drained by the owner.
fn deferred_link(block: usize, target: usize) {
    unsafe { (block as *mut usize).write(target) };
}

fn deferred_next(block: usize) -> usize {
    unsafe { (block as *const usize).read() }
}

impl Heap {
    pub fn new(id: u32) -> Self {
        const EMPTY_SIZE_LIST: SpanList = SpanList::new();
        const EMPTY_SPAN_LIST: SpanList = SpanList::new();
        Heap {
            id,
            next_in_bucket: AtomicUsize::new(0),
            next_orphan: AtomicUsize::new(0),
            size_cache: [EMPTY_SIZE_LIST; NUM_SIZE_CLASSES],
            span_cache: [EMPTY_SPAN_LIST; MAX_PAGE_COUNT + 1],
            deferred_free: TreiberStack::new(),
        }
    }

    /// Drain blocks other threads queued for this heap since the last
    /// drain, reclaiming them exactly as a local free would.
    pub fn drain_deferred(&mut self, stats: &Stats) {
        let mut cur = self.deferred_free.swap_empty();
        if cur != 0 {
            stats.record_deferred_free_drain();
        }
        while cur != 0 {
            let next = deferred_next(cur);
            unsafe { self.free_local(cur as *mut u8, stats) };
            cur = next;
        }
    }

    /// Queue a block for the heap that owns it, to be reclaimed on that
    /// heap's next `drain_deferred`. Called when a thread frees a block it
    /// didn't carve.
    pub fn queue_deferred(owner: *mut Heap, ptr: *mut u8) {
        unsafe {
            (*owner).deferred_free.push(ptr as usize, deferred_link);
        }
    }

    pub fn allocate(
        &mut self,
        size: usize,
        global: &GlobalCache,
        stats: &Stats,
    ) -> Result<*mut u8, MapError> {
        self.drain_deferred(stats);

        match size_class::size_to_class(size) {
            Some(class) => self.allocate_small(class, global, stats),
            None => self.allocate_large_direct(size, stats),
        }
    }

    fn allocate_small(
        &mut self,
        class: u8,
        global: &GlobalCache,
        stats: &Stats,
    ) -> Result<*mut u8, MapError> {
        let list = &mut self.size_cache[class as usize];
        if let Some(span) = non_null(list.head) {
            let ptr = unsafe { (*span).take_block() };
            if unsafe { (*span).is_full() } {
                unsafe { list.remove(span) };
            }
            stats.record_alloc_hit();
            return Ok(ptr);
        }

        let info = size_class::class_info(class);
        let span = self.acquire_span(info.pages, global, stats)?;
        unsafe {
            SpanHeader::init(span, class, info.pages, info.size, info.block_count);
            (*span).set_heap_id(self.id);
        }
        let ptr = unsafe { (*span).take_block() };
        if !unsafe { (*span).is_full() } {
            unsafe { self.size_cache[class as usize].push_front(span) };
        }
        Ok(ptr)
    }

    /// Above the largest medium class: a span sized exactly (rounded up to
    /// whole pages) for this one request, carved as a single block. Once
    /// the header plus payload would spill past a single span granule,
    /// masking a payload pointer back to its header would land in the
    /// wrong granule, so those go through [`crate::huge`] instead, which
    /// tracks `(ptr, page_count)` out of band rather than via an embedded
    /// header.
    fn allocate_large_direct(
        &mut self,
        size: usize,
        stats: &Stats,
    ) -> Result<*mut u8, MapError> {
        let page_count = platform::bytes_to_pages(size + span::HEADER_SIZE);
        if page_count > MAX_PAGE_COUNT {
            let ptr = crate::huge::allocate(size)?;
            stats.record_os_map(platform::bytes_to_pages(size));
            return Ok(ptr);
        }
        let span = platform::map(page_count)? as *mut SpanHeader;
        unsafe {
            SpanHeader::init(span, span::LARGE_DIRECT, page_count as u32, size as u32, 1);
            (*span).set_heap_id(self.id);
        }
        stats.record_os_map(page_count);
        Ok(unsafe { (*span).take_block() })
    }

    /// Get a fresh span of `page_count` pages: from this heap's own cache,
    /// then the global cache, then the OS.
    fn acquire_span(
        &mut self,
        page_count: u32,
        global: &GlobalCache,
        stats: &Stats,
    ) -> Result<*mut SpanHeader, MapError> {
        let local = &mut self.span_cache[page_count as usize];
        if let Some(span) = non_null(local.head) {
            unsafe { local.remove(span) };
            stats.record_span_cache_hit();
            span_trace!("heap {} reused span {:p} from local cache ({} pages)", self.id, span, page_count);
            return Ok(span);
        }

        if let Some((head, len)) = global.extract(page_count) {
            stats.record_global_cache_hit();
            span_trace!("heap {} pulled {} spans from global cache ({} pages)", self.id, len, page_count);
            // Keep the first span to carve now; stash the rest locally.
            let mut rest = unsafe { (*head).next() };
            unsafe {
                (*head).clear_next();
            }
            let mut kept = 0;
            while !rest.is_null() {
                let next = unsafe { (*rest).next() };
                unsafe {
                    (*rest).clear_next();
                    self.span_cache[page_count as usize].push_front(rest);
                }
                kept += 1;
                rest = next;
            }
            debug_assert_eq!(kept + 1, len);
            return Ok(head);
        }

        let ptr = platform::map(page_count as usize)? as *mut SpanHeader;
        stats.record_os_map(page_count as usize);
        span_trace!("heap {} mapped fresh span {:p} ({} pages)", self.id, ptr, page_count);
        Ok(ptr)
    }

    /// Free a block known to belong to a span this heap owns (either
    /// because this thread carved it, or it arrived via the deferred-free
    /// inbox).
    ///
    /// # Safety
    /// `ptr` must be a live block whose span's `heap_id` is this heap's id.
    pub unsafe fn free_local(&mut self, ptr: *mut u8, stats: &Stats) {
        let span = span::header_of(ptr);
        let was_full = unsafe { (*span).is_full() };
        unsafe { (*span).give_block(ptr) };

        if unsafe { (*span).size_class } == span::LARGE_DIRECT {
            let pages = unsafe { (*span).page_count };
            unsafe { platform::unmap(span as *mut u8, pages as usize) };
            stats.record_os_unmap(pages as usize);
            return;
        }

        let class = unsafe { (*span).size_class } as usize;
        if was_full {
            unsafe { self.size_cache[class].push_front(span) };
        }

        if unsafe { (*span).is_empty() } {
            unsafe { self.size_cache[class].remove(span) };
            let pages = unsafe { (*span).page_count };
            span_trace!("heap {} retired empty span {:p} to span cache ({} pages)", self.id, span, pages);
            unsafe {
                self.span_cache[pages as usize].push_front(span);
            }
        }
    }

    /// Drain every block this heap still owns from the wire and unmap every
    /// span it's holding, in either the partial size-class lists or the
    /// span cache. Used by shutdown; leaves the heap empty but otherwise
    /// valid, since heaps are immortal and may be adopted again.
    pub fn unmap_all(&mut self, stats: &Stats) {
        self.drain_deferred(stats);
        for list in self.size_cache.iter_mut() {
            let mut span = list.pop_front();
            while !span.is_null() {
                let pages = unsafe { (*span).page_count };
                unsafe { platform::unmap(span as *mut u8, pages as usize) };
                stats.record_os_unmap(pages as usize);
                span = list.pop_front();
            }
        }
        for list in self.span_cache.iter_mut() {
            let mut span = list.pop_front();
            while !span.is_null() {
                let pages = unsafe { (*span).page_count };
                unsafe { platform::unmap(span as *mut u8, pages as usize) };
                stats.record_os_unmap(pages as usize);
                span = list.pop_front();
            }
        }
    }

    /// Move half of any per-page-count span cache over
    /// [`THREAD_SPAN_CACHE_LIMIT`] to the global cache.
    pub fn scavenge(&mut self, global: &GlobalCache, stats: &Stats) {
        for pages in 1..=MAX_PAGE_COUNT {
            let list = &mut self.span_cache[pages];
            if list.len <= THREAD_SPAN_CACHE_LIMIT {
                continue;
            }
            let give = list.len / 2;
            let head = list.pop_front();
            if head.is_null() {
                continue;
            }
            let mut tail = head;
            let mut count = 1;
            while count < give {
                let next = list.pop_front();
                if next.is_null() {
                    break;
                }
                unsafe { (*tail).set_next(next) };
                tail = next;
                count += 1;
            }
            unsafe { (*tail).clear_next() };
            let moved = unsafe { global.insert(pages as u32, head, count) };
            stats.record_span_cache_spill(count);
            span_trace!("heap {} spilled {} spans to global cache ({} pages)", self.id, count, pages);

            if moved > crate::config::GLOBAL_SPAN_CACHE_LIMIT {
                unmap_surplus(global, pages as u32, stats);
            }
        }
    }
}

/// Pop sublists back off the global cache and unmap them until the
/// page-count class is no longer over [`crate::config::GLOBAL_SPAN_CACHE_LIMIT`].
fn unmap_surplus(global: &GlobalCache, pages: u32, stats: &Stats) {
    while global.is_over_limit(pages) {
        let (head, len) = match global.extract(pages) {
            Some(sublist) => sublist,
            None => break,
        };
        let mut cur = head;
        for _ in 0..len {
            let next = unsafe { (*cur).next() };
            unsafe { platform::unmap(cur as *mut u8, pages as usize) };
            stats.record_os_unmap(pages as usize);
            cur = next;
        }
    }
}

fn non_null(ptr: *mut SpanHeader) -> Option<*mut SpanHeader> {
    if ptr.is_null() { None } else { Some(ptr) }
}

unsafe impl Send for Heap {}
