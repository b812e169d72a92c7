//! Heap registry and orphan stack.
//!
//! The registry lets a non-owner thread's `deallocate` find the heap that
//! owns a block's span by id, to push onto that heap's deferred-free
//! inbox. Heaps are created once per thread and never freed — when a
//! thread exits, its heap is pushed onto the orphan stack instead, so a
//! later thread can adopt it rather than mapping a fresh one. Because
//! heaps are immortal, both stacks are free of the ABA hazard a Treiber
//! stack would otherwise have to guard against.

use crate::config::HEAP_REGISTRY_BUCKETS;
use crate::heap::Heap;
use crate::sync::TreiberStack;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub struct Registry {
    buckets: [AtomicUsize; HEAP_REGISTRY_BUCKETS],
    orphans: TreiberStack,
    next_id: AtomicU32,
}

impl Registry {
    pub const fn new() -> Self {
        const ZERO: AtomicUsize = AtomicUsize::new(0);
        Registry {
            buckets: [ZERO; HEAP_REGISTRY_BUCKETS],
            orphans: TreiberStack::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate a fresh, non-zero heap id. 0 is reserved to mean "no
    /// owner" in `SpanHeader::heap_id`.
    pub fn alloc_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
            // Wrapped past u32::MAX back to 0: skip it and keep going.
        }
    }

    /// Thread heaps onto their bucket's chain. `heap.id` must already be
    /// set; never removed afterward, since heaps are immortal.
    pub fn insert(&self, heap: *mut Heap) {
        let bucket = unsafe { (*heap).id as usize % HEAP_REGISTRY_BUCKETS };
        let slot = &self.buckets[bucket];
        let mut head = slot.load(Ordering::Relaxed);
        loop {
            unsafe {
                (*heap).next_in_bucket.store(head, Ordering::Relaxed);
            }
            match slot.compare_exchange_weak(
                head,
                heap as usize,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Find the heap with the given id, or null if it isn't registered
    /// (it always should be, for any id observed in a live span header).
    pub fn find(&self, id: u32) -> *mut Heap {
        let bucket = id as usize % HEAP_REGISTRY_BUCKETS;
        let mut cur = self.buckets[bucket].load(Ordering::Acquire);
        while cur != 0 {
            let heap = cur as *mut Heap;
            unsafe {
                if (*heap).id == id {
                    return heap;
                }
                cur = (*heap).next_in_bucket.load(Ordering::Acquire);
            }
        }
        core::ptr::null_mut()
    }

    /// Push a heap whose owning thread has exited onto the orphan stack.
    pub fn orphan(&self, heap: *mut Heap) {
        let link = |addr: usize, target: usize| unsafe {
            (*(addr as *mut Heap))
                .next_orphan
                .store(target, Ordering::Relaxed);
        };
        unsafe {
            self.orphans.push(heap as usize, link);
        }
    }

    /// Pop an orphaned heap for a new thread to adopt, or null if none are
    /// waiting (the caller should map a fresh heap in that case).
    pub fn adopt(&self) -> *mut Heap {
        let next_of =
            |addr: usize| unsafe { (*(addr as *mut Heap)).next_orphan.load(Ordering::Acquire) };
        self.orphans.pop(next_of) as *mut Heap
    }

    /// Walk every bucket's chain and invoke `f` on each registered heap,
    /// live or orphaned. Used by shutdown to reclaim every heap's cached
    /// spans; not safe to call while another thread may still be inserting.
    pub fn for_each_heap(&self, mut f: impl FnMut(*mut Heap)) {
        for bucket in self.buckets.iter() {
            let mut cur = bucket.load(Ordering::Acquire);
            while cur != 0 {
                let heap = cur as *mut Heap;
                f(heap);
                cur = unsafe { (*heap).next_in_bucket.load(Ordering::Acquire) };
            }
        }
    }
}

unsafe impl Sync for Registry {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use std::boxed::Box;

    #[test]
    fn test_alloc_id_monotonic_nonzero() {
        let reg = Registry::new();
        let a = reg.alloc_id();
        let b = reg.alloc_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert!(b > a);
    }

    #[test]
    fn test_insert_and_find() {
        let reg = Registry::new();
        let id = reg.alloc_id();
        let mut heap = Box::new(Heap::new(id));
        let ptr: *mut Heap = &mut *heap;
        reg.insert(ptr);
        assert_eq!(reg.find(id), ptr);
        assert!(reg.find(id + 1000).is_null());
    }

    #[test]
    fn test_for_each_heap_visits_every_inserted_heap() {
        let reg = Registry::new();
        let mut h1 = Box::new(Heap::new(reg.alloc_id()));
        let mut h2 = Box::new(Heap::new(reg.alloc_id()));
        let p1: *mut Heap = &mut *h1;
        let p2: *mut Heap = &mut *h2;
        reg.insert(p1);
        reg.insert(p2);

        let mut seen = std::vec::Vec::new();
        reg.for_each_heap(|h| seen.push(h));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&p1));
        assert!(seen.contains(&p2));
    }

    #[test]
    fn test_orphan_adopt_is_lifo() {
        let reg = Registry::new();
        let mut h1 = Box::new(Heap::new(reg.alloc_id()));
        let mut h2 = Box::new(Heap::new(reg.alloc_id()));
        let p1: *mut Heap = &mut *h1;
        let p2: *mut Heap = &mut *h2;
        reg.orphan(p1);
        reg.orphan(p2);
        assert_eq!(reg.adopt(), p2);
        assert_eq!(reg.adopt(), p1);
        assert!(reg.adopt().is_null());
    }
}
