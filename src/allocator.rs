//! Public API and the top-level `GlobalAlloc` adapter.
//!
//! Global state (the heap registry, the global span cache, and the
//! statistics counters) lives in module-level statics; per-thread state is
//! a `Heap` reached through `std::thread_local!` when the `std` feature is
//! enabled. The core allocate/free paths never lock anything — the only
//! spinlocks in the crate guard the (rare) huge-allocation table.

use crate::config;
use crate::global_cache::GlobalCache;
use crate::heap::Heap;
use crate::huge;
use crate::platform::{self, MapError};
use crate::registry::Registry;
use crate::size_class;
use crate::span;
use crate::stats::{Snapshot, Stats};
use crate::sync::Once;
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;

/// Why [`initialize`] failed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InitError {
    /// The platform cannot provide spans aligned to the configured span
    /// granularity; see [`crate::platform::MapError::AlignmentUnavailable`].
    AlignmentUnavailable,
}

impl From<MapError> for InitError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::AlignmentUnavailable => InitError::AlignmentUnavailable,
            MapError::OsAllocationFailed => InitError::AlignmentUnavailable,
        }
    }
}

static REGISTRY: Registry = Registry::new();
static GLOBAL_CACHE: GlobalCache = GlobalCache::new();
static STATS: Stats = Stats::new();
static INIT: Once = Once::new();
static mut INIT_OK: bool = false;

/// Build the size-class table and confirm the platform can satisfy the
/// span-granularity alignment invariant. Idempotent and cheap to call
/// speculatively from every entry point; the real work happens once.
pub fn initialize() -> Result<(), InitError> {
    INIT.call(|| {
        let ok = platform::check_alignment_available().is_ok();
        if ok {
            size_class::ensure_initialized();
        }
        unsafe {
            INIT_OK = ok;
        }
    });
    if unsafe { INIT_OK } {
        Ok(())
    } else {
        Err(InitError::AlignmentUnavailable)
    }
}

/// Drain every registered heap's caches, unmap every span they're holding,
/// unmap everything sitting in the global cache, and reset the one-time
/// init state so a later `initialize()` starts clean.
///
/// # Safety
/// Only safe when no other thread can be concurrently allocating — for
/// test harnesses that re-run `initialize()`/`finalize()` cycles in
/// isolation.
pub unsafe fn finalize() {
    REGISTRY.for_each_heap(|heap| unsafe {
        (*heap).unmap_all(&STATS);
    });
    GLOBAL_CACHE.unmap_all(|span, pages| unsafe {
        platform::unmap(span as *mut u8, pages as usize);
        STATS.record_os_unmap(pages as usize);
    });
    unsafe {
        size_class::reset();
        INIT.reset();
        INIT_OK = false;
    }
}

pub fn stats_snapshot() -> Snapshot {
    STATS.snapshot()
}

fn new_heap(id: u32) -> *mut Heap {
    let page = platform::map(1).expect("failed to map a page for heap metadata");
    let heap_ptr = page as *mut Heap;
    unsafe {
        heap_ptr.write(Heap::new(id));
    }
    heap_ptr
}

#[cfg(feature = "std")]
mod tls {
    use super::*;
    use core::cell::Cell;

    struct HeapGuard;

    impl Drop for HeapGuard {
        fn drop(&mut self) {
            let ptr = HEAP.with(|c| c.get());
            if !ptr.is_null() {
                REGISTRY.orphan(ptr);
            }
        }
    }

    std::thread_local! {
        static HEAP: Cell<*mut Heap> = const { Cell::new(core::ptr::null_mut()) };
        static GUARD: HeapGuard = const { HeapGuard };
    }

    /// Return this thread's heap, adopting an orphan or creating a fresh
    /// one on first use.
    pub fn current_heap() -> *mut Heap {
        let existing = HEAP.with(|c| c.get());
        if !existing.is_null() {
            return existing;
        }
        // Force the guard's thread_local to exist now, so its Drop runs
        // when this thread exits even if it never touches GUARD again.
        GUARD.with(|_| {});

        let adopted = REGISTRY.adopt();
        let heap = if !adopted.is_null() {
            STATS.record_heap_adoption();
            adopted
        } else {
            let id = REGISTRY.alloc_id();
            let h = new_heap(id);
            REGISTRY.insert(h);
            STATS.record_heap_creation();
            h
        };
        HEAP.with(|c| c.set(heap));
        heap
    }

    /// Orphan the calling thread's heap right now, if it has one, and clear
    /// the slot so the next `current_heap()` call adopts or creates fresh.
    /// Leaves the thread-exit guard armed but harmless: its `Drop` finds a
    /// null slot and does nothing.
    pub fn release_current_heap() {
        let ptr = HEAP.with(|c| c.replace(core::ptr::null_mut()));
        if !ptr.is_null() {
            REGISTRY.orphan(ptr);
        }
    }
}

/// A no-op: a heap is allocated lazily on first actual allocation, not here.
#[cfg(feature = "std")]
pub fn thread_initialize() {
    let _ = initialize();
}

/// Orphan the calling thread's heap (if it has allocated one yet) back onto
/// the registry, so a later thread can adopt it instead of mapping a fresh
/// one. Safe to call even if this thread never allocated anything.
#[cfg(feature = "std")]
pub fn thread_finalize() {
    tls::release_current_heap();
}

#[cfg(feature = "std")]
pub fn allocate(size: usize) -> *mut u8 {
    if initialize().is_err() {
        return ptr::null_mut();
    }
    let heap = tls::current_heap();
    match unsafe { (*heap).allocate(size, &GLOBAL_CACHE, &STATS) } {
        Ok(p) => p,
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
/// `ptr` must be null or a live pointer previously returned by `allocate`
/// (or by the `GlobalAlloc` adapter) and not already freed.
#[cfg(feature = "std")]
pub unsafe fn deallocate(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    if huge::is_tracked(ptr) {
        unsafe { huge::deallocate(ptr) };
        STATS.record_free();
        return;
    }

    let span = span::header_of(ptr);
    let owner_id = unsafe { (*span).heap_id() };
    let heap = tls::current_heap();
    STATS.record_free();
    if unsafe { (*heap).id } == owner_id {
        unsafe { (*heap).free_local(ptr, &STATS) };
    } else {
        let owner_heap = REGISTRY.find(owner_id);
        if !owner_heap.is_null() {
            Heap::queue_deferred(owner_heap, ptr);
        }
    }
}

/// # Safety
/// `ptr` must be a live pointer previously returned by `allocate`.
pub unsafe fn usable_size(ptr: *mut u8) -> usize {
    if ptr.is_null() {
        return 0;
    }
    if let Some(size) = huge::usable_size(ptr) {
        return size;
    }
    let span = span::header_of(ptr);
    unsafe { (*span).block_size as usize }
}

/// # Safety
/// `ptr` must be null or a live pointer previously returned by `allocate`.
#[cfg(feature = "std")]
pub unsafe fn reallocate(ptr: *mut u8, new_size: usize) -> *mut u8 {
    if ptr.is_null() {
        return allocate(new_size);
    }
    if new_size == 0 {
        unsafe { deallocate(ptr) };
        return ptr::null_mut();
    }
    let old_size = unsafe { usable_size(ptr) };
    if new_size <= old_size {
        return ptr;
    }
    let new_ptr = allocate(new_size);
    if !new_ptr.is_null() {
        unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size)) };
        unsafe { deallocate(ptr) };
    }
    new_ptr
}

/// Registers as `#[global_allocator]`. Requires the `std` feature (the
/// core allocation algorithm is `no_std`, but the global-allocator surface
/// needs per-thread state to hang off of).
#[cfg(feature = "std")]
pub struct SpanAlloc;

/// Every block the allocator hands out is naturally aligned to
/// `SMALL_GRANULARITY` (span starts are `SPAN_GRANULARITY`-aligned, the
/// header size is a multiple of it, and so is every class's block size).
/// Beyond that, satisfying `layout.align()` means carving an aligned
/// pointer out of a larger block and recording where the real block
/// started, since `dealloc`/`realloc` must hand the real pointer back to
/// `deallocate`/`usable_size`, not the aligned one the caller sees.
///
/// The real pointer is stashed in the `usize` word immediately before the
/// aligned pointer, so recovering it on the free path is a single read.
#[inline]
unsafe fn alloc_over_aligned(layout: Layout) -> *mut u8 {
    let align = layout.align();
    let padded = match layout
        .size()
        .checked_add(align - 1)
        .and_then(|n| n.checked_add(size_of::<usize>()))
    {
        Some(n) => n,
        None => return ptr::null_mut(),
    };
    let raw = allocate(padded);
    if raw.is_null() {
        return ptr::null_mut();
    }
    let aligned = (raw as usize + size_of::<usize>() + align - 1) & !(align - 1);
    unsafe { (aligned as *mut usize).sub(1).write(raw as usize) };
    aligned as *mut u8
}

/// Recover the real block pointer stashed by [`alloc_over_aligned`].
#[inline]
unsafe fn real_ptr_of(aligned: *mut u8) -> *mut u8 {
    unsafe { (aligned as *const usize).sub(1).read() as *mut u8 }
}


#[cfg(feature = "std")]
unsafe impl GlobalAlloc for SpanAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        if layout.align() <= config::SMALL_GRANULARITY {
            return allocate(layout.size());
        }
        unsafe { alloc_over_aligned(layout) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if layout.align() <= config::SMALL_GRANULARITY {
            unsafe { deallocate(ptr) };
            return;
        }
        unsafe { deallocate(real_ptr_of(ptr)) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.size() == 0 {
            let new_layout =
                unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }
        if layout.align() <= config::SMALL_GRANULARITY {
            return unsafe { reallocate(ptr, new_size) };
        }
        // Over-aligned blocks always move: there is no in-place grow path
        // for a pointer that isn't a real block start.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { alloc_over_aligned(new_layout) };
        if !new_ptr.is_null() {
            let copy_len = layout.size().min(new_size);
            unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };
            unsafe { self.dealloc(ptr, layout) };
        }
        new_ptr
    }
}
