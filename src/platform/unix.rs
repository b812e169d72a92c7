//! Raw `mmap`/`munmap`/`madvise` bindings. No `libc` dependency: the small
//! set of syscalls needed is declared directly.
//!
//! This module makes no alignment promises beyond whatever the kernel's
//! own page granularity gives for free — `SPAN_GRANULARITY` alignment is
//! layered on top by `platform::map`'s over-allocate-and-trim.

use core::ffi::c_void;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;
const MADV_DONTNEED: i32 = 4;

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;

    fn madvise(addr: *mut c_void, length: usize, advice: i32) -> i32;
}

/// Request `bytes` of anonymous memory. `hint` is passed as the `addr`
/// argument without `MAP_FIXED`, so the kernel is free to ignore it; the
/// result is never guaranteed to land at `hint`, only to be non-overlapping
/// with any existing mapping.
pub unsafe fn page_alloc(hint: usize, bytes: usize) -> *mut u8 {
    let raw = unsafe {
        mmap(
            hint as *mut c_void,
            bytes,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        core::ptr::null_mut()
    } else {
        raw as *mut u8
    }
}

pub unsafe fn page_dealloc(ptr: *mut u8, bytes: usize) {
    unsafe { munmap(ptr as *mut c_void, bytes) };
}

/// Advise the kernel that `[ptr, ptr+bytes)` can be reclaimed; the mapping
/// stays reserved, so a later touch just faults fresh zeroed pages back in.
pub unsafe fn page_decommit(ptr: *mut u8, bytes: usize) {
    unsafe { madvise(ptr as *mut c_void, bytes, MADV_DONTNEED) };
}
