//! The page mapper: the allocator's only contact with the operating
//! system's virtual memory layer.
//!
//! `map` produces regions aligned to the span granularity `G`
//! (`config::SPAN_GRANULARITY`) so that any live pointer resolves to its
//! owning span's header in O(1) by masking: `ptr & !(G - 1)`. That
//! alignment invariant is global and non-negotiable — if the platform
//! cannot provide it, `initialize()` fails rather than silently handing
//! out misaligned spans.

#[cfg(all(unix, not(miri)))]
mod unix;
#[cfg(all(windows, not(miri)))]
mod windows;

#[cfg(miri)]
mod miri;

use crate::config::{PAGE_SHIFT, PAGE_SIZE, SPAN_GRANULARITY};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Reasons the page mapper can fail to produce a region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MapError {
    /// The platform's raw allocation primitive itself failed (OOM).
    OsAllocationFailed,
    /// The platform cannot be coaxed into `SPAN_GRANULARITY`-aligned
    /// regions at all.
    AlignmentUnavailable,
}

/// Hint for where to place the next mapping, advanced past each
/// successful placement so that repeated `map` calls tend to land in
/// contiguous territory and avoid the retry-on-misalignment path more
/// often over time.
static NEXT_HINT: AtomicUsize = AtomicUsize::new(0);

#[inline]
fn raw_alloc(hint: usize, bytes: usize) -> *mut u8 {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            let _ = hint;
            unsafe { miri::page_alloc(bytes) }
        } else if #[cfg(unix)] {
            unsafe { unix::page_alloc(hint, bytes) }
        } else if #[cfg(windows)] {
            let _ = hint;
            unsafe { windows::page_alloc(bytes) }
        } else {
            compile_error!("spanalloc has no platform backend for this target")
        }
    }
}

#[inline]
fn raw_dealloc(ptr: *mut u8, bytes: usize) {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_dealloc(ptr, bytes) };
        } else if #[cfg(unix)] {
            unsafe { unix::page_dealloc(ptr, bytes) };
        } else if #[cfg(windows)] {
            unsafe { windows::page_dealloc(ptr, bytes) };
        }
    }
}

/// Whether the platform's allocation granularity divides `SPAN_GRANULARITY`
/// evenly, in which case natural alignment plus trimming can always reach
/// a `G`-aligned sub-region. Unix's `mmap` is 4 KiB-granular virtually
/// everywhere, so this is always true there; on Windows, `VirtualAlloc`'s
/// 64 KiB granularity only trims evenly when `G` is itself a multiple of
/// 64 KiB.
#[cfg(windows)]
const PLATFORM_GRANULARITY: usize = 65536;

#[cfg(windows)]
fn platform_supports_alignment() -> bool {
    SPAN_GRANULARITY % PLATFORM_GRANULARITY == 0
}

#[cfg(not(windows))]
fn platform_supports_alignment() -> bool {
    true
}

/// Confirm the platform can provide `G`-aligned regions before any span is
/// ever mapped. Called once from `allocator::initialize`.
pub fn check_alignment_available() -> Result<(), MapError> {
    if platform_supports_alignment() {
        Ok(())
    } else {
        Err(MapError::AlignmentUnavailable)
    }
}

/// Map a region of `page_count` pages, `G`-aligned at its start.
///
/// On platforms whose raw allocator already guarantees granularity at
/// least as fine as needed (Unix `mmap`, or Windows when `G` is a
/// multiple of the native 64 KiB granularity), this over-allocates by up
/// to one `G` and trims the unaligned lead/tail back to the OS. Unix's
/// `munmap` permits releasing an arbitrary sub-range; Windows instead
/// relies on `VirtualAlloc` already landing on a `G`-aligned boundary
/// (checked once via [`check_alignment_available`]), since
/// `VirtualFree(MEM_RELEASE)` cannot release a partial region.
pub fn map(page_count: usize) -> Result<*mut u8, MapError> {
    debug_assert!(page_count > 0);
    let bytes = page_count * PAGE_SIZE;

    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            // The miri shim allocates directly against `std::alloc` with
            // `SPAN_GRANULARITY` as the requested alignment, so there is no
            // lead/tail to trim — `System` honors the alignment exactly.
            let ptr = raw_alloc(0, bytes);
            if ptr.is_null() {
                return Err(MapError::OsAllocationFailed);
            }
            debug_assert_eq!(ptr as usize & (SPAN_GRANULARITY - 1), 0);
            Ok(ptr)
        } else if #[cfg(windows)] {
            if !platform_supports_alignment() {
                return Err(MapError::AlignmentUnavailable);
            }
            let hint = NEXT_HINT.load(Ordering::Relaxed);
            let ptr = raw_alloc(hint, bytes);
            if ptr.is_null() {
                return Err(MapError::OsAllocationFailed);
            }
            debug_assert_eq!(ptr as usize & (SPAN_GRANULARITY - 1), 0);
            NEXT_HINT.store(ptr as usize + bytes, Ordering::Relaxed);
            Ok(ptr)
        } else {
            // mmap's own granularity is always page-sized, which may be
            // coarser than SPAN_GRANULARITY is fine: over-allocate by up to
            // one G and trim the misaligned lead/tail back to the OS.
            // munmap tolerates releasing an arbitrary sub-range of a prior
            // mapping, unlike VirtualFree.
            let over_bytes = bytes + SPAN_GRANULARITY - PAGE_SIZE;
            let hint = NEXT_HINT.load(Ordering::Relaxed);
            let raw = raw_alloc(hint, over_bytes);
            if raw.is_null() {
                return Err(MapError::OsAllocationFailed);
            }

            let raw_addr = raw as usize;
            let aligned_addr = (raw_addr + SPAN_GRANULARITY - 1) & !(SPAN_GRANULARITY - 1);

            let lead = aligned_addr - raw_addr;
            if lead > 0 {
                raw_dealloc(raw_addr as *mut u8, lead);
            }
            let trail = (raw_addr + over_bytes) - (aligned_addr + bytes);
            if trail > 0 {
                raw_dealloc((aligned_addr + bytes) as *mut u8, trail);
            }

            NEXT_HINT.store(aligned_addr + bytes, Ordering::Relaxed);
            Ok(aligned_addr as *mut u8)
        }
    }
}

/// Return a region previously produced by `map` with the same
/// `page_count`.
///
/// # Safety
/// `ptr` must have been returned by `map(page_count)` and not already
/// unmapped.
pub unsafe fn unmap(ptr: *mut u8, page_count: usize) {
    raw_dealloc(ptr, page_count * PAGE_SIZE);
}

/// Convert a byte count into whole pages, rounding up.
#[inline]
pub fn bytes_to_pages(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

#[allow(dead_code)]
const _: () = assert!(1usize << PAGE_SHIFT == PAGE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_granularity_aligned() {
        let page_count = 3;
        let ptr = map(page_count).expect("map failed");
        assert_eq!((ptr as usize) & (SPAN_GRANULARITY - 1), 0);
        unsafe {
            core::ptr::write_bytes(ptr, 0xAB, page_count * PAGE_SIZE);
            for i in 0..page_count * PAGE_SIZE {
                assert_eq!(*ptr.add(i), 0xAB);
            }
            unmap(ptr, page_count);
        }
    }

    #[test]
    fn test_map_many_spans_all_aligned() {
        let mut spans = std::vec::Vec::new();
        for _ in 0..16 {
            let ptr = map(1).expect("map failed");
            assert_eq!((ptr as usize) & (SPAN_GRANULARITY - 1), 0);
            spans.push(ptr);
        }
        for ptr in spans {
            unsafe { unmap(ptr, 1) };
        }
    }

    #[test]
    fn test_alignment_available_on_this_platform() {
        // Default spanalloc.toml uses G = 64 KiB, which every backend here
        // supports.
        assert!(check_alignment_available().is_ok());
    }
}
