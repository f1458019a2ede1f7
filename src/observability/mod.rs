//! Observability for docstore
//!
//! - Structured logging (one JSON object per line, stderr)
//! - Scope-based lifecycle events around builds and cache fills
//! - Progress events for long passes
//!
//! Observability is read-only: logging never fails or alters an operation.
//!
//! ```ignore
//! use docstore::observability::{Logger, ObservationScope};
//!
//! Logger::info("CACHE_OPENED", &[("entries", "42")]);
//!
//! let scope = ObservationScope::new("STORE_BUILD");
//! // ... do work ...
//! scope.complete();
//! ```

mod logger;
mod progress;
mod scope;

pub use logger::{Logger, Severity};
pub use progress::Progress;
pub use scope::{ObservationScope, Timer};
