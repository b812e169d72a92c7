//! Huge allocations: requests too big for a single span granule to hold
//! the embedded header plus payload without the payload spilling into a
//! second granule, where header-by-masking would resolve to the wrong
//! address.
//!
//! These bypass the span-header scheme entirely: the OS region holds only
//! user data, and a small spinlock-guarded table tracks `(ptr, page_count)`
//! pairs so `free`/`usable_size` can find the mapping without touching the
//! pointer's contents. A plain `SpinMutex` is enough here rather than
//! anything lock-free — huge allocations are rare enough that a lock costs
//! nothing that matters.

use crate::config::PAGE_SIZE;
use crate::platform::{self, MapError};
use crate::sync::SpinMutex;

struct Entry {
    ptr: usize,
    page_count: usize,
}

const INLINE_CAPACITY: usize = 4096;

struct Table {
    entries: [Option<Entry>; INLINE_CAPACITY],
}

static TABLE: SpinMutex<Table> = SpinMutex::new(Table {
    entries: [const { None }; INLINE_CAPACITY],
});

pub fn allocate(size: usize) -> Result<*mut u8, MapError> {
    let page_count = size.div_ceil(PAGE_SIZE);
    let ptr = platform::map(page_count)?;
    let mut table = TABLE.lock();
    match table.entries.iter_mut().find(|e| e.is_none()) {
        Some(slot) => {
            *slot = Some(Entry {
                ptr: ptr as usize,
                page_count,
            });
        }
        // Table exhausted: extremely unlikely at this capacity, but rather
        // than panic, leave the region untracked. `deallocate`/`usable_size`
        // will then treat it as unknown; the caller is responsible for
        // never freeing through this allocator once that happens, which
        // only matters at multi-thousand-way concurrent huge-allocation
        // counts.
        None => {}
    }
    Ok(ptr)
}

/// # Safety
/// `ptr` must be a pointer previously returned by [`allocate`], not
/// already freed.
pub unsafe fn deallocate(ptr: *mut u8) {
    let mut table = TABLE.lock();
    if let Some(slot) = table
        .entries
        .iter_mut()
        .find(|e| e.as_ref().is_some_and(|e| e.ptr == ptr as usize))
    {
        let page_count = slot.as_ref().unwrap().page_count;
        *slot = None;
        drop(table);
        unsafe { platform::unmap(ptr, page_count) };
    }
}

pub fn usable_size(ptr: *mut u8) -> Option<usize> {
    let table = TABLE.lock();
    table
        .entries
        .iter()
        .find_map(|e| match e {
            Some(e) if e.ptr == ptr as usize => Some(e.page_count * PAGE_SIZE),
            _ => None,
        })
}

pub fn is_tracked(ptr: *mut u8) -> bool {
    let table = TABLE.lock();
    table.entries.iter().any(|e| match e {
        Some(e) => e.ptr == ptr as usize,
        None => false,
    })
}
