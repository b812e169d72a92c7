//! Size class table and lookup functions.
//!
//! Small classes step by `SMALL_GRANULARITY` bytes; medium classes step by
//! `MEDIUM_INCREMENT` bytes above that. The table is computed once at
//! runtime, on first call to [`ensure_initialized`], from the tunables in
//! [`crate::config`] — so a custom `spanalloc.toml` reshapes the whole
//! class layout without touching generated code.

use crate::config::{
    MEDIUM_CLASS_COUNT, MEDIUM_INCREMENT, NUM_SIZE_CLASSES, PAGE_SIZE, SMALL_CLASS_COUNT,
    SMALL_GRANULARITY, SPAN_GRANULARITY,
};
use crate::span;
use crate::sync::Once;

/// Largest block count a single span is allowed to carve a class into.
/// Keeps `SpanHeader::block_count`/`bump_cursor` bookkeeping cheap and
/// bounds how many blocks a single span can scatter across a thread's
/// free list in one go.
const MAX_BLOCKS_PER_SPAN: usize = 255;

/// Resolved parameters for one size class.
#[derive(Clone, Copy, Default)]
pub struct SizeClassInfo {
    /// Allocation size for this class, in bytes. Requests up to this size
    /// (and above the previous class's size) round up to it.
    pub size: u32,
    /// Pages a span carved for this class spans.
    pub pages: u32,
    /// Blocks a span of `pages` pages is divided into for this class.
    pub block_count: u32,
}

impl SizeClassInfo {
    #[inline]
    pub fn span_bytes(&self) -> usize {
        self.pages as usize * PAGE_SIZE
    }
}

static TABLE_INIT: Once = Once::new();
static mut TABLE: [SizeClassInfo; NUM_SIZE_CLASSES] = [SizeClassInfo {
    size: 0,
    pages: 0,
    block_count: 0,
}; NUM_SIZE_CLASSES];

/// Largest size servable through the class table; anything bigger takes
/// the large-direct path.
pub fn max_class_size() -> usize {
    ensure_initialized();
    unsafe { (*core::ptr::addr_of!(TABLE))[NUM_SIZE_CLASSES - 1].size as usize }
}

/// Build the size-class table if it hasn't been built yet. Safe to call
/// from every allocation path; the actual computation happens exactly
/// once, guarded by [`Once`].
pub fn ensure_initialized() {
    TABLE_INIT.call(|| {
        let table = compute_table();
        unsafe {
            TABLE = table;
        }
    });
}

/// Rebuild the table from the current tunables.
///
/// # Safety
/// Only safe when no other thread is concurrently allocating — intended
/// for test harnesses that re-run `initialize()`/`finalize()` cycles.
pub unsafe fn reset() {
    unsafe {
        TABLE_INIT.reset();
    }
}

fn compute_table() -> [SizeClassInfo; NUM_SIZE_CLASSES] {
    let mut table = [SizeClassInfo {
        size: 0,
        pages: 0,
        block_count: 0,
    }; NUM_SIZE_CLASSES];

    let mut prev_size: usize = 0;
    for i in 0..SMALL_CLASS_COUNT {
        let size = (i + 1) * SMALL_GRANULARITY;
        table[i] = class_for_size(size);
        debug_assert!(size > prev_size);
        prev_size = size;
    }
    for j in 0..MEDIUM_CLASS_COUNT {
        let size = SMALL_CLASS_COUNT * SMALL_GRANULARITY + (j + 1) * MEDIUM_INCREMENT;
        table[SMALL_CLASS_COUNT + j] = class_for_size(size);
    }

    // Two distinct nominal sizes can collapse onto the same (pages,
    // block_count) span shape once `MAX_BLOCKS_PER_SPAN` caps how far
    // `pages` can grow; when that happens, keep only the larger of the
    // run so `size_to_class` doesn't waste a lookup step on a class that
    // serves nothing a neighbor doesn't already cover, but leave the slot
    // zeroed ("use the next real class up") rather than compacting the
    // array, so class indices stay stable.
    let mut i = NUM_SIZE_CLASSES;
    while i > 1 {
        i -= 1;
        if table[i].pages == table[i - 1].pages && table[i].block_count == table[i - 1].block_count
        {
            table[i - 1] = SizeClassInfo {
                size: 0,
                pages: 0,
                block_count: 0,
            };
        }
    }

    table
}

/// Choose the span shape (page count, block count) for a class whose
/// nominal block size is `size`: search increasing page counts for the one
/// that minimizes leftover (unused tail) bytes per span, without exceeding
/// `MAX_BLOCKS_PER_SPAN` blocks. Blocks start at `span_bytes - HEADER_SIZE`,
/// not at `span_bytes` — the embedded header isn't carvable storage.
fn class_for_size(size: usize) -> SizeClassInfo {
    let max_pages = SPAN_GRANULARITY / PAGE_SIZE;
    let mut best_pages = 1usize;
    let mut best_waste = usize::MAX;
    let mut best_blocks = ((PAGE_SIZE.saturating_sub(span::HEADER_SIZE)) / size).max(1);

    for pages in 1..=max_pages {
        let span_bytes = pages * PAGE_SIZE;
        let usable_bytes = span_bytes.saturating_sub(span::HEADER_SIZE);
        let blocks = (usable_bytes / size).min(MAX_BLOCKS_PER_SPAN);
        if blocks == 0 {
            continue;
        }
        let waste = usable_bytes - blocks * size;
        if waste < best_waste {
            best_waste = waste;
            best_pages = pages;
            best_blocks = blocks;
        }
        if waste == 0 {
            break;
        }
    }

    SizeClassInfo {
        size: size as u32,
        pages: best_pages as u32,
        block_count: best_blocks as u32,
    }
}

/// Map a request size to a class index, or `None` for the large-direct
/// path. Walks upward from the exact-fit index past any zeroed
/// (merged-away) slot, since every non-zero slot's `size` is an upper
/// bound for every smaller index below the next populated one.
pub fn size_to_class(size: usize) -> Option<u8> {
    ensure_initialized();
    if size == 0 || size > max_class_size() {
        return None;
    }
    unsafe {
        for (idx, class) in (*core::ptr::addr_of!(TABLE)).iter().enumerate() {
            if class.size != 0 && size <= class.size as usize {
                return Some(idx as u8);
            }
        }
    }
    None
}

pub fn class_info(class: u8) -> SizeClassInfo {
    ensure_initialized();
    unsafe { (*core::ptr::addr_of!(TABLE))[class as usize] }
}
