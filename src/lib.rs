//! docstore - compressed document storage with lazy sharded sequences
//!
//! Two building blocks for large, once-computed corpora:
//!
//! - `CompressedRecordStore`: builds a compressed, checkpointed, key-indexed
//!   store from a record generator and serves bounded-cost lookups
//! - `VirtualSequence`: a lazy, sliceable view over records split across
//!   shards of unknown size
//!
//! `Docstore` is the key to record contract on top; `CacheDocstore` keeps a
//! persistent local cache in front of slow sources.

pub mod config;
pub mod crash_point;
pub mod docstore;
pub mod metadata;
pub mod observability;
pub mod schema;
pub mod sequence;
pub mod storage;

pub use config::{DocstoreConfig, StoreConfig};
pub use docstore::{CacheDocstore, Docstore, PrefixedDocstore, ShardedDocstore};
pub use schema::{Field, FieldType, Record, Schema, Value};
pub use sequence::{Shard, SliceSpec, VirtualSequence};
pub use storage::{CompressedRecordStore, IndexKey, StoreError, StoreErrorCode, StoreResult};
