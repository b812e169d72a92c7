//! C-ABI exports for linking `spanalloc` from non-Rust callers. Gated
//! behind `features = ["ffi"]`; built as part of a staticlib/cdylib target.

use crate::allocator;
use core::alloc::{GlobalAlloc, Layout};

static ALLOC: allocator::SpanAlloc = allocator::SpanAlloc;

#[unsafe(no_mangle)]
pub extern "C" fn spanalloc_initialize() -> bool {
    allocator::initialize().is_ok()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_alloc(size: usize, align: usize) -> *mut u8 {
    let layout = unsafe { Layout::from_size_align_unchecked(size, align) };
    unsafe { ALLOC.alloc(layout) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_dealloc(ptr: *mut u8, size: usize, align: usize) {
    let layout = unsafe { Layout::from_size_align_unchecked(size, align) };
    unsafe { ALLOC.dealloc(ptr, layout) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_realloc(
    ptr: *mut u8,
    size: usize,
    align: usize,
    new_size: usize,
) -> *mut u8 {
    let layout = unsafe { Layout::from_size_align_unchecked(size, align) };
    unsafe { ALLOC.realloc(ptr, layout, new_size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn spanalloc_usable_size(ptr: *mut u8) -> usize {
    unsafe { allocator::usable_size(ptr) }
}
