//! Windows virtual memory implementation using VirtualAlloc/VirtualFree.
//!
//! `VirtualAlloc` reservations always land on the native 64 KiB allocation
//! granularity, so whenever `SPAN_GRANULARITY` is itself a multiple of that
//! (checked once in `platform::check_alignment_available`), every
//! reservation already comes out `SPAN_GRANULARITY`-aligned with no
//! trimming needed — which matters because `VirtualFree(MEM_RELEASE)`
//! refuses to release a partial reservation.

use core::ffi::c_void;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_RELEASE: u32 = 0x8000;
const MEM_DECOMMIT: u32 = 0x4000;
const PAGE_READWRITE: u32 = 0x04;

unsafe extern "system" {
    #[link_name = "VirtualAlloc"]
    fn virtual_alloc(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_allocation_type: u32,
        fl_protect: u32,
    ) -> *mut c_void;

    #[link_name = "VirtualFree"]
    fn virtual_free(lp_address: *mut c_void, dw_size: usize, dw_free_type: u32) -> i32;
}

pub unsafe fn page_alloc(bytes: usize) -> *mut u8 {
    let ptr = unsafe {
        virtual_alloc(
            core::ptr::null_mut(),
            bytes,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, _bytes: usize) {
    // MEM_RELEASE requires dwSize = 0 (releases the entire reservation).
    unsafe { virtual_free(ptr as *mut c_void, 0, MEM_RELEASE) };
}

pub unsafe fn page_decommit(ptr: *mut u8, bytes: usize) {
    unsafe { virtual_free(ptr as *mut c_void, bytes, MEM_DECOMMIT) };
}

pub unsafe fn page_recommit(ptr: *mut u8, bytes: usize) {
    unsafe { virtual_alloc(ptr as *mut c_void, bytes, MEM_COMMIT, PAGE_READWRITE) };
}
