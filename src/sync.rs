//! Lightweight synchronization primitives for use in the allocator.
//!
//! We cannot use `std::sync::Mutex` because it allocates. Instead we provide
//! a simple test-and-set spinlock, a `SpinMutex<T>` wrapper, a one-time
//! init guard, and the lock-free stack primitives the global span cache,
//! orphan stack, and per-heap deferred-free inbox are built from (a
//! tagged-pointer Treiber stack for the global span cache, and a plain
//! Treiber stack for the orphan stack and deferred-free inbox).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// A simple test-and-set spinlock.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        loop {
            // Spin while locked (read-only, doesn't invalidate cache line)
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

unsafe impl Send for SpinLock {}
unsafe impl Sync for SpinLock {}

/// A mutex that uses a spinlock for synchronization.
/// Does not allocate and can be used in a `static`.
pub struct SpinMutex<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinMutex<T> {
    pub const fn new(val: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(val),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.lock();
        SpinMutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinMutexGuard { mutex: self })
        } else {
            None
        }
    }
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

/// RAII guard for `SpinMutex`. Unlocks on drop.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.lock.unlock();
    }
}

/// A one-shot initialization guard, spun the same way `SpinLock` spins.
///
/// Tracks uninitialized / running / done, as a reusable primitive for the
/// size-class table and other process-wide state that `initialize()`
/// populates exactly once.
pub struct Once {
    state: AtomicU8,
}

const ONCE_UNSTARTED: u8 = 0;
const ONCE_RUNNING: u8 = 1;
const ONCE_DONE: u8 = 2;

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

impl Once {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ONCE_UNSTARTED),
        }
    }

    /// Run `f` exactly once across all callers. Concurrent callers spin
    /// until the winner's `f` has returned.
    pub fn call(&self, f: impl FnOnce()) {
        if self.state.load(Ordering::Acquire) == ONCE_DONE {
            return;
        }
        if self
            .state
            .compare_exchange(
                ONCE_UNSTARTED,
                ONCE_RUNNING,
                Ordering::Acquire,
                Ordering::Acquire,
            )
            .is_ok()
        {
            f();
            self.state.store(ONCE_DONE, Ordering::Release);
            return;
        }
        while self.state.load(Ordering::Acquire) != ONCE_DONE {
            core::hint::spin_loop();
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == ONCE_DONE
    }

    /// Reset back to unstarted. Only safe when no other thread can be
    /// concurrently racing `call` — used by `finalize()` in tests that
    /// re-initialize the allocator in-process.
    ///
    /// # Safety
    /// Caller must guarantee exclusivity (e.g. a single-threaded test
    /// harness between `finalize()` and the next `initialize()`).
    pub unsafe fn reset(&self) {
        self.state.store(ONCE_UNSTARTED, Ordering::Release);
    }
}

/// A Treiber stack of `*mut T` nodes linked through a caller-supplied
/// accessor pair, with no ABA tag — safe only when popped nodes are never
/// freed while still reachable from a concurrent pop. Both callers satisfy
/// that: the orphan stack's heaps are never freed, and the deferred-free
/// stack is only ever popped by its owning heap, via swap-to-null, so
/// pushers and the single popper never race on the pop side.
pub struct TreiberStack {
    head: AtomicUsize,
}

impl Default for TreiberStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TreiberStack {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
        }
    }

    /// Push `node`, after the caller has already stored the current head
    /// into whatever field on `node` serves as its link (via `link`).
    ///
    /// # Safety
    /// `node` must be a valid pointer that outlives the stack's use of it.
    #[inline]
    pub unsafe fn push(&self, node: usize, link: impl Fn(usize, usize)) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            link(node, head);
            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically swap the whole stack out for empty, returning the old
    /// head (0 if the stack was empty). Used by the deferred-free drain,
    /// which only ever runs on the owning heap's thread.
    #[inline]
    pub fn swap_empty(&self) -> usize {
        self.head.swap(0, Ordering::Acquire)
    }

    /// Pop a single node via CAS, given an accessor that reads the node's
    /// link field. Used by the orphan stack, which may be popped by any
    /// thread looking to adopt a heap.
    #[inline]
    pub fn pop(&self, next_of: impl Fn(usize) -> usize) -> usize {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head == 0 {
                return 0;
            }
            let next = next_of(head);
            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return head,
                Err(actual) => head = actual,
            }
        }
    }
}

/// Lock-free stack of spans for one page-count class in the global span
/// cache. The head word packs a span pointer with an occupancy count in
/// the low bits that span-granularity alignment frees up, so a single
/// `AtomicUsize` CAS updates both fields together.
///
/// A reserved encoding (pointer 0, count 1 — never produced by a real
/// state, since an empty stack has count 0) serves as a lock token for the
/// brief extract critical section.
pub struct TaggedSpanStack {
    head: AtomicUsize,
}

const LOCK_TOKEN: usize = 1;

impl Default for TaggedSpanStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TaggedSpanStack {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn tag_mask() -> usize {
        crate::config::SPAN_GRANULARITY - 1
    }

    #[inline]
    fn decode(word: usize) -> (usize, usize) {
        let mask = Self::tag_mask();
        (word & !mask, word & mask)
    }

    #[inline]
    fn encode(ptr: usize, count: usize) -> usize {
        debug_assert_eq!(ptr & Self::tag_mask(), 0, "span pointer must be G-aligned");
        debug_assert!(count <= Self::tag_mask(), "count overflows tag bits");
        ptr | count
    }

    /// Insert a sublist of `k` already-`next`-linked spans headed by
    /// `first`. `set_tail_next` must point `first`'s (or its tail's) link
    /// at the previous head; the caller supplies it because only `span.rs`
    /// knows how to convert an absolute pointer into a self-relative
    /// offset stored in the header.
    ///
    /// Returns the resulting occupancy count.
    pub fn insert(
        &self,
        first: usize,
        k: usize,
        mut link_tail_to: impl FnMut(usize, usize),
    ) -> usize {
        loop {
            let word = self.head.load(Ordering::Acquire);
            if Self::decode(word).0 == 0 && word == LOCK_TOKEN {
                core::hint::spin_loop();
                continue;
            }
            let (old_ptr, old_count) = Self::decode(word);
            link_tail_to(first, old_ptr);
            let new_count = old_count + k;
            let new_word = Self::encode(first, new_count);
            match self
                .head
                .compare_exchange_weak(word, new_word, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return new_count,
                Err(_) => continue,
            }
        }
    }

    /// Extract whatever sublist is currently at the head (its length is
    /// read from the span's own bookkeeping by the caller after this
    /// returns, via `list_size`). Returns `(head_ptr, skip_to, new_count)`
    /// where `skip_to` is the absolute address the cache head is restored
    /// to (the precomputed skip link, read from the extracted span by
    /// `read_skip`), or `None` if the stack was empty.
    pub fn extract(
        &self,
        read_skip: impl FnOnce(usize) -> usize,
        read_len: impl FnOnce(usize) -> usize,
    ) -> Option<(usize, usize)> {
        loop {
            let word = self.head.load(Ordering::Acquire);
            if word == LOCK_TOKEN {
                core::hint::spin_loop();
                continue;
            }
            let (ptr, count) = Self::decode(word);
            if ptr == 0 {
                return None;
            }
            if self
                .head
                .compare_exchange_weak(word, LOCK_TOKEN, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            let skip_to = read_skip(ptr);
            let k = read_len(ptr);
            let new_count = count.saturating_sub(k);
            let new_word = if skip_to == 0 {
                0
            } else {
                Self::encode(skip_to, new_count)
            };
            self.head.store(new_word, Ordering::Release);
            return Some((ptr, new_count));
        }
    }

    /// Current occupancy, observed without locking (racy but fine for
    /// statistics and the global-cache-ceiling check).
    #[inline]
    pub fn len(&self) -> usize {
        Self::decode(self.head.load(Ordering::Relaxed)).1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
