//! Crash point injection for testing build atomicity
//!
//! When `DOCSTORE_CRASH_POINT` names a point, reaching that point terminates
//! the process via `std::process::abort()`: no cleanup, no unwinding.
//!
//! ```bash
//! DOCSTORE_CRASH_POINT=build_before_meta_rename cargo test ...
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("DOCSTORE_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `DOCSTORE_CRASH_POINT` equals the given name
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Aborts the process if the named crash point is enabled
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    /// Data and index files written, nothing renamed yet
    pub const BUILD_BEFORE_DATA_RENAME: &str = "build_before_data_rename";
    /// Data and index files in place, metadata marker not yet written
    pub const BUILD_BEFORE_META_RENAME: &str = "build_before_meta_rename";
    /// Cache batch appended but not yet synced
    pub const CACHE_AFTER_APPEND: &str = "cache_after_append";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            BUILD_BEFORE_DATA_RENAME,
            BUILD_BEFORE_META_RENAME,
            CACHE_AFTER_APPEND,
        ]
    }
}
