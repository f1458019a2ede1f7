//! Virtual sequences over sharded record storage
//!
//! A `VirtualSequence` presents an ordered list of shards as one lazy,
//! sliceable sequence of records. Shards are counted only when a slice or
//! index needs their lengths and are opened only while the cursor is inside
//! them.

mod errors;
mod shard;
mod shards;
mod slice;
mod virtual_seq;

pub use errors::{SequenceError, SequenceResult};
pub use shard::{SeekableRecordIter, Shard};
pub use shards::{write_json_lines, JsonLinesShard, MemoryShard};
pub use slice::{SliceBound, SliceRange, SliceSpec};
pub use virtual_seq::VirtualSequence;
