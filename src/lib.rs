#![no_std]

//! spanalloc: a general-purpose, thread-caching, lock-free memory
//! allocator.
//!
//! Every span is mapped aligned to a fixed granularity so any live pointer
//! resolves to its owning span's header in O(1) by masking off the low
//! bits. Threads get their own heap with per-size-class partial-span lists
//! and a per-page-count span cache; a global, lock-free span cache smooths
//! spans moving between heaps with different allocation patterns; and
//! blocks freed by a thread that doesn't own their span are queued on the
//! owning heap's deferred-free inbox rather than contended for directly.
//!
//! The core algorithm has no `std` dependency. The `std` feature (on by
//! default) adds `std::thread_local!`-backed per-thread heap management
//! and the [`GlobalAlloc`](core::alloc::GlobalAlloc) adapter; without it,
//! callers drive [`heap::Heap`] instances directly.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: spanalloc::SpanAlloc = spanalloc::SpanAlloc;
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod config;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod global_cache;
pub mod heap;
pub mod huge;
pub mod platform;
pub mod registry;
pub mod size_class;
pub mod span;
pub mod stats;
pub mod sync;

pub use allocator::InitError;
#[cfg(feature = "std")]
pub use allocator::SpanAlloc;
