//! Compile-time tunables.
//!
//! The actual values come from `build.rs`, which reads `spanalloc.toml`
//! (or the file named by `SPANALLOC_CONFIG`) and validates it; see
//! `config_gen.rs` in `OUT_DIR` for the resolved constants.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

/// Total number of size classes: small classes plus medium classes.
/// Index 0 is a valid class, not a sentinel — every index in
/// `0..NUM_SIZE_CLASSES` names a real class. The large-direct path is
/// selected by size, not by index.
pub const NUM_SIZE_CLASSES: usize = SMALL_CLASS_COUNT + MEDIUM_CLASS_COUNT;

/// Number of distinct page-count buckets a span can have: `1..=S` where
/// `S = G / page_size`.
pub const MAX_PAGE_COUNT: usize = PAGES_PER_SPAN_MAX;

/// Number of buckets in the heap registry. Prime, to reduce collisions
/// when hashing heap ids.
pub const HEAP_REGISTRY_BUCKETS: usize = 197;
