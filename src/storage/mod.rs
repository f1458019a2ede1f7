//! Compressed record store
//!
//! A store is a set of files sharing a base path:
//!
//! - `<base>.data`: zstd blocks of encoded records plus a checkpoint table
//! - `<base>.idx.<field>`: sorted key index per indexed field
//! - `<base>.meta`: JSON marker, renamed into place last
//!
//! # Design Principles
//!
//! - Built once from a source iterator, read-only afterwards
//! - Checksum-verified on every block and index read
//! - The marker is the only proof of a completed build
//! - A schema change is detected, never silently served

mod block;
mod checksum;
mod errors;
pub(crate) mod files;
mod key_index;
mod meta;
mod store;

pub use block::{BlockCursor, Checkpoint, DataReader, DataWriter};
pub use checksum::{compute_checksum, verify_checksum, ChecksumWriter};
pub use errors::{Severity, StoreError, StoreErrorCode, StoreResult};
pub use key_index::{index_path, IndexBuilder, IndexKey, IndexReader};
pub use meta::{StoreMeta, FORMAT_VERSION};
pub use store::{records_source, CompressedRecordStore, RecordIter, RecordStream, SourceFn, StoreStatus};
