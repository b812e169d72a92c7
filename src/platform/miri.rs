//! Miri-compatible platform shim using `std::alloc` as backing store.
//!
//! Miri can't execute real OS syscalls (`mmap`/`VirtualAlloc`), so this uses
//! the system allocator, requesting `SPAN_GRANULARITY` as the alignment
//! directly — `System` honors arbitrary power-of-two alignments, so there
//! is no need for the over-allocate-and-trim dance the real backends use.
//! This lets Miri check all the unsafe pointer logic in the allocator
//! internals without touching the OS.

extern crate alloc;

use crate::config::SPAN_GRANULARITY;
use core::alloc::Layout;

pub unsafe fn page_alloc(bytes: usize) -> *mut u8 {
    let layout = Layout::from_size_align(bytes, SPAN_GRANULARITY).unwrap();
    unsafe { alloc::alloc::alloc_zeroed(layout) }
}

pub unsafe fn page_dealloc(ptr: *mut u8, bytes: usize) {
    let layout = Layout::from_size_align(bytes, SPAN_GRANULARITY).unwrap();
    unsafe { alloc::alloc::dealloc(ptr, layout) };
}

pub unsafe fn page_decommit(_ptr: *mut u8, _bytes: usize) {}

pub unsafe fn page_recommit(_ptr: *mut u8, _bytes: usize) {}
