//! Reads the TOML tunables file (`spanalloc.toml` by default, overridable
//! via `SPANALLOC_CONFIG`) and bakes the compile-time constants into a
//! generated `config_gen.rs`, included by `src/config.rs`.
//!
//! The size-class *table* itself is computed once at runtime by
//! `initialize()` from these tunables — the build script only validates
//! and emits the knobs the search runs against.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    span_granularity: Option<usize>,
    page_size: Option<usize>,
    small_granularity: Option<usize>,
    small_class_count: Option<usize>,
    medium_class_count: Option<usize>,
    medium_increment: Option<usize>,
    thread_span_cache_limit: Option<usize>,
    global_span_cache_limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct Resolved {
    span_granularity: usize,
    page_size: usize,
    page_shift: u32,
    small_granularity: usize,
    small_class_count: usize,
    medium_class_count: usize,
    medium_increment: usize,
    thread_span_cache_limit: usize,
    global_span_cache_limit: usize,
}

fn resolve(cfg: &ConfigSection) -> Resolved {
    let page_size = cfg.page_size.unwrap_or(4096);
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({page_size}) must be a power of 2"
    );

    let span_granularity = cfg.span_granularity.unwrap_or(65536);
    assert!(
        span_granularity.is_power_of_two(),
        "span_granularity ({span_granularity}) must be a power of 2"
    );
    assert!(
        span_granularity % page_size == 0,
        "span_granularity ({span_granularity}) must be a multiple of page_size ({page_size})"
    );

    let small_granularity = cfg.small_granularity.unwrap_or(16);
    assert!(
        small_granularity > 0 && small_granularity.is_power_of_two(),
        "small_granularity ({small_granularity}) must be a power of 2"
    );

    let small_class_count = cfg.small_class_count.unwrap_or(32);
    let medium_class_count = cfg.medium_class_count.unwrap_or(32);
    let medium_increment = cfg.medium_increment.unwrap_or(512);
    let thread_span_cache_limit = cfg.thread_span_cache_limit.unwrap_or(32);
    let global_span_cache_limit = cfg.global_span_cache_limit.unwrap_or(4096);

    assert!(small_class_count > 0, "small_class_count must be > 0");
    assert!(medium_class_count > 0, "medium_class_count must be > 0");
    assert!(medium_increment > 0, "medium_increment must be > 0");
    assert!(
        small_class_count + medium_class_count < 255,
        "too many size classes ({}); free_list index must fit in 8 bits",
        small_class_count + medium_class_count
    );
    assert!(
        thread_span_cache_limit > 0,
        "thread_span_cache_limit must be > 0"
    );
    assert!(
        global_span_cache_limit >= thread_span_cache_limit,
        "global_span_cache_limit ({global_span_cache_limit}) must be >= thread_span_cache_limit ({thread_span_cache_limit})"
    );
    assert!(
        global_span_cache_limit < span_granularity,
        "global_span_cache_limit ({global_span_cache_limit}) must fit in the tag bits freed up by span_granularity ({span_granularity})"
    );

    Resolved {
        span_granularity,
        page_size,
        page_shift: page_size.trailing_zeros(),
        small_granularity,
        small_class_count,
        medium_class_count,
        medium_increment,
        thread_span_cache_limit,
        global_span_cache_limit,
    }
}

fn generate(cfg: &Resolved, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs from the tunables file. Do not edit.\n\n\
         pub const SPAN_GRANULARITY: usize = {};\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const PAGES_PER_SPAN_MAX: usize = SPAN_GRANULARITY / PAGE_SIZE;\n\
         pub const SMALL_GRANULARITY: usize = {};\n\
         pub const SMALL_CLASS_COUNT: usize = {};\n\
         pub const MEDIUM_CLASS_COUNT: usize = {};\n\
         pub const MEDIUM_INCREMENT: usize = {};\n\
         pub const THREAD_SPAN_CACHE_LIMIT: usize = {};\n\
         pub const GLOBAL_SPAN_CACHE_LIMIT: usize = {};\n",
        cfg.span_granularity,
        cfg.page_shift,
        cfg.page_size,
        cfg.small_granularity,
        cfg.small_class_count,
        cfg.medium_class_count,
        cfg.medium_increment,
        cfg.thread_span_cache_limit,
        cfg.global_span_cache_limit,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{manifest_dir}/spanalloc.toml")
}

fn main() {
    println!("cargo:rerun-if-env-changed=SPANALLOC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();
    let config_path = env::var("SPANALLOC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={config_path}");

    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {config_path}: {e}"));
    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve(&config.config);

    generate(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
