//! Shard contract
//!
//! A shard is one physical storage unit contributing a contiguous run of
//! records to a `VirtualSequence`. It reports its record count and opens a
//! cursor that can skip to any of its records.

use super::errors::{SequenceError, SequenceResult};
use crate::schema::Record;

/// Forward cursor over one shard with coarse seeking
pub trait SeekableRecordIter {
    /// Next record, `None` once the shard is exhausted
    fn next_record(&mut self) -> SequenceResult<Option<Record>>;

    /// Shard-local index of the record `next_record` returns next
    fn position(&self) -> usize;

    /// Positions the cursor so `next_record` returns record `n`
    ///
    /// The default skips forward record by record and rejects backward
    /// seeks; formats with random-access points override it.
    fn seek(&mut self, n: usize) -> SequenceResult<()> {
        let position = self.position();
        if n < position {
            return Err(SequenceError::InvalidSeek { from: position, to: n });
        }
        for _ in position..n {
            if self.next_record()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Releases the shard's resources; must be idempotent
    fn close(&mut self) {}
}

/// One physical storage unit
pub trait Shard {
    /// Number of records in the shard
    fn len(&self) -> SequenceResult<usize>;

    /// Whether the shard holds no records
    fn is_empty(&self) -> SequenceResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Opens a cursor positioned at the first record
    fn open(&self) -> SequenceResult<Box<dyn SeekableRecordIter>>;

    /// Short label used in logs and errors
    fn describe(&self) -> String {
        "shard".to_string()
    }
}
