//! Lazy, sliceable sequence over an ordered list of shards
//!
//! Shards are enumerated lazily and counted only when a position or the
//! total length requires it. Iteration opens a shard only when the next
//! wanted position falls inside it, seeks to the local offset, and closes
//! it once the cursor moves past its end.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::errors::{SequenceError, SequenceResult};
use super::shard::{SeekableRecordIter, Shard};
use super::slice::{SliceRange, SliceSpec};
use crate::observability::Logger;
use crate::schema::Record;

type ShardEnumerator = Box<dyn Iterator<Item = Box<dyn Shard>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Located {
    index: usize,
    start: usize,
    len: usize,
}

/// Lazily enumerated shards with cached prefix sums of their lengths
struct ShardList {
    pending: RefCell<Option<ShardEnumerator>>,
    shards: RefCell<Vec<Rc<dyn Shard>>>,
    /// `prefix[k]` is the number of records in the first `k` counted shards
    prefix: RefCell<Vec<usize>>,
    opened: Cell<usize>,
}

impl ShardList {
    fn new(enumerator: ShardEnumerator) -> Self {
        Self {
            pending: RefCell::new(Some(enumerator)),
            shards: RefCell::new(Vec::new()),
            prefix: RefCell::new(vec![0]),
            opened: Cell::new(0),
        }
    }

    fn shard(&self, index: usize) -> Option<Rc<dyn Shard>> {
        loop {
            if let Some(shard) = self.shards.borrow().get(index) {
                return Some(Rc::clone(shard));
            }
            let next = self.pending.borrow_mut().as_mut().and_then(|it| it.next());
            match next {
                Some(shard) => self.shards.borrow_mut().push(Rc::from(shard)),
                None => {
                    self.pending.borrow_mut().take();
                    return None;
                }
            }
        }
    }

    /// Counts the next uncounted shard; false once the list is exhausted
    fn count_next(&self) -> SequenceResult<bool> {
        let counted = self.prefix.borrow().len() - 1;
        let shard = match self.shard(counted) {
            Some(shard) => shard,
            None => return Ok(false),
        };
        let len = shard.len()?;
        let mut prefix = self.prefix.borrow_mut();
        let total = prefix[counted];
        prefix.push(total + len);
        Ok(true)
    }

    /// Shard holding absolute `position`, counting shards as needed
    fn locate(&self, position: usize) -> SequenceResult<Option<Located>> {
        loop {
            {
                let prefix = self.prefix.borrow();
                let counted_total = prefix[prefix.len() - 1];
                if position < counted_total {
                    let index = prefix.partition_point(|&p| p <= position) - 1;
                    return Ok(Some(Located {
                        index,
                        start: prefix[index],
                        len: prefix[index + 1] - prefix[index],
                    }));
                }
            }
            if !self.count_next()? {
                return Ok(None);
            }
        }
    }

    fn total_len(&self) -> SequenceResult<usize> {
        while self.count_next()? {}
        let prefix = self.prefix.borrow();
        Ok(prefix[prefix.len() - 1])
    }
}

struct OpenShard {
    index: usize,
    start: usize,
    len: Option<usize>,
    label: String,
    iter: Box<dyn SeekableRecordIter>,
}

/// A lazy, sliceable, seekable view over records spread across shards
///
/// Iterating yields `SequenceResult<Record>`; the first error ends the
/// iteration. Slices share the shard list (and its cached lengths) with the
/// sequence they were taken from.
pub struct VirtualSequence {
    shards: Rc<ShardList>,
    range: Option<SliceRange>,
    emitted: usize,
    current: Option<OpenShard>,
    next_shard: usize,
    done: bool,
}

impl VirtualSequence {
    /// Sequence over `shards`, enumerated only as far as needed
    pub fn new<I>(shards: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Shard>>,
        I::IntoIter: 'static,
    {
        Self::with_list(Rc::new(ShardList::new(Box::new(shards.into_iter()))), None)
    }

    /// Sequence over a single shard
    pub fn from_shard(shard: impl Shard + 'static) -> Self {
        let shard: Box<dyn Shard> = Box::new(shard);
        Self::new(std::iter::once(shard))
    }

    fn with_list(shards: Rc<ShardList>, range: Option<SliceRange>) -> Self {
        Self {
            shards,
            range,
            emitted: 0,
            current: None,
            next_shard: 0,
            done: false,
        }
    }

    /// Resolved range of this sequence over the underlying shards
    pub fn range(&self) -> SequenceResult<SliceRange> {
        match self.range {
            Some(range) => Ok(range),
            None => Ok(SliceRange::full(self.shards.total_len()?)),
        }
    }

    /// Number of records; counts every shard the first time
    pub fn len(&self) -> SequenceResult<usize> {
        Ok(self.range()?.len)
    }

    /// Whether the sequence holds no records
    pub fn is_empty(&self) -> SequenceResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of shards opened through this sequence and its slices
    pub fn shards_opened(&self) -> usize {
        self.shards.opened.get()
    }

    /// New sequence over a sub-range, composed with this sequence's range
    pub fn slice(&self, spec: impl Into<SliceSpec>) -> SequenceResult<VirtualSequence> {
        let range = self.range()?.apply(&spec.into())?;
        Ok(Self::with_list(Rc::clone(&self.shards), Some(range)))
    }

    /// Record at `index`; negative values count from the end
    pub fn index(&self, index: isize) -> SequenceResult<Record> {
        let range = self.range()?;
        let local = range.index(index)?;
        let single = SliceRange {
            start: range.start + local * range.step,
            step: 1,
            len: 1,
        };
        let mut cursor = Self::with_list(Rc::clone(&self.shards), Some(single));
        match cursor.next() {
            Some(result) => result,
            None => Err(SequenceError::OutOfBounds {
                index,
                len: range.len,
            }),
        }
    }

    /// Splits into `parts` contiguous sequences of near-equal length
    pub fn split(&self, parts: usize) -> SequenceResult<Vec<VirtualSequence>> {
        if parts == 0 {
            return Err(SequenceError::InvalidSlice(
                "cannot split into zero parts".to_string(),
            ));
        }
        let len = self.len()?;
        (0..parts)
            .map(|i| {
                let start = len * i / parts;
                let stop = len * (i + 1) / parts;
                self.slice(start..stop)
            })
            .collect()
    }

    /// Releases the open shard, if any; later calls are no-ops
    pub fn close(&mut self) {
        self.close_current();
        self.done = true;
    }

    fn close_current(&mut self) {
        if let Some(mut open) = self.current.take() {
            open.iter.close();
            Logger::trace(
                "SEQUENCE_SHARD_CLOSED",
                &[("shard", open.label.as_str())],
            );
        }
    }

    fn open_shard(&mut self, index: usize, start: usize, len: Option<usize>) -> SequenceResult<()> {
        let shard = self
            .shards
            .shard(index)
            .ok_or(SequenceError::OutOfBounds {
                index: isize::try_from(index).unwrap_or(isize::MAX),
                len: index,
            })?;
        let iter = shard.open()?;
        let label = shard.describe();
        self.shards.opened.set(self.shards.opened.get() + 1);
        Logger::trace("SEQUENCE_SHARD_OPENED", &[("shard", label.as_str())]);
        self.current = Some(OpenShard {
            index,
            start,
            len,
            label,
            iter,
        });
        Ok(())
    }

    fn next_in_range(&mut self, range: SliceRange) -> SequenceResult<Option<Record>> {
        let target = match range.position(self.emitted) {
            Some(position) => position,
            None => return Ok(None),
        };
        loop {
            if let Some(open) = self.current.as_mut() {
                let len = open.len.unwrap_or(0);
                if target >= open.start && target < open.start + len {
                    let local = target - open.start;
                    if open.iter.position() != local {
                        open.iter.seek(local)?;
                    }
                    return match open.iter.next_record()? {
                        Some(record) => {
                            self.emitted += 1;
                            Ok(Some(record))
                        }
                        None => Err(SequenceError::ShortShard {
                            shard: open.label.clone(),
                            expected: len,
                            found: local,
                        }),
                    };
                }
                self.close_current();
            }
            match self.shards.locate(target)? {
                Some(located) => self.open_shard(located.index, located.start, Some(located.len))?,
                None => return Ok(None),
            }
        }
    }

    fn next_streaming(&mut self) -> SequenceResult<Option<Record>> {
        loop {
            if let Some(open) = self.current.as_mut() {
                if let Some(record) = open.iter.next_record()? {
                    self.emitted += 1;
                    return Ok(Some(record));
                }
                self.next_shard = open.index + 1;
                self.close_current();
            }
            if self.shards.shard(self.next_shard).is_none() {
                return Ok(None);
            }
            self.open_shard(self.next_shard, self.emitted, None)?;
        }
    }
}

impl Iterator for VirtualSequence {
    type Item = SequenceResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.range {
            Some(range) => self.next_in_range(range),
            None => self.next_streaming(),
        };
        match result {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for VirtualSequence {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MemoryShard;
    use crate::schema::Value;

    fn shard(range: std::ops::Range<i64>) -> Box<dyn Shard> {
        Box::new(MemoryShard::new(
            range.map(|i| Record::new(vec![Value::Int(i)])).collect(),
        ))
    }

    fn ints(seq: VirtualSequence) -> Vec<i64> {
        seq.map(|r| r.unwrap().get(0).and_then(Value::as_int).unwrap())
            .collect()
    }

    #[test]
    fn test_streaming_crosses_shards() {
        let seq = VirtualSequence::new(vec![shard(0..3), shard(3..3), shard(3..5)]);
        assert_eq!(ints(seq), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_len_and_slices() {
        let seq = VirtualSequence::new(vec![shard(0..3), shard(3..7), shard(7..9)]);
        assert_eq!(seq.len().unwrap(), 9);
        assert_eq!(ints(seq.slice(2..6).unwrap()), vec![2, 3, 4, 5]);
        assert_eq!(ints(seq.slice(SliceSpec::from_start(-2)).unwrap()), vec![7, 8]);
        assert_eq!(ints(seq.slice(SliceSpec::default().with_step(4)).unwrap()), vec![0, 4, 8]);
        assert_eq!(ints(seq.slice(5..2).unwrap()), Vec::<i64>::new());
    }

    #[test]
    fn test_double_slice() {
        let seq = VirtualSequence::new(vec![shard(0..10), shard(10..20)]);
        let outer = seq.slice(SliceSpec::range(3, 18).with_step(2)).unwrap();
        let inner = outer.slice(SliceSpec::range(1, -1).with_step(3)).unwrap();
        // outer: 3,5,7,9,11,13,15,17 ; inner [1:-1:3] -> 5,11
        assert_eq!(ints(inner), vec![5, 11]);
    }

    #[test]
    fn test_index() {
        let seq = VirtualSequence::new(vec![shard(0..2), shard(2..5)]);
        let value = |r: Record| r.get(0).and_then(Value::as_int).unwrap();
        assert_eq!(value(seq.index(0).unwrap()), 0);
        assert_eq!(value(seq.index(3).unwrap()), 3);
        assert_eq!(value(seq.index(-1).unwrap()), 4);
        assert!(seq.index(5).unwrap_err().is_out_of_bounds());
    }

    #[test]
    fn test_split() {
        let seq = VirtualSequence::new(vec![shard(0..4), shard(4..10)]);
        let parts = seq.split(3).unwrap();
        let lens: Vec<usize> = parts.iter().map(|p| p.len().unwrap()).collect();
        assert_eq!(lens, vec![3, 3, 4]);
        let all: Vec<i64> = parts.into_iter().flat_map(ints).collect();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert!(seq.split(0).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut seq = VirtualSequence::new(vec![shard(0..3)]);
        assert!(seq.next().is_some());
        seq.close();
        seq.close();
        assert!(seq.next().is_none());
    }
}
