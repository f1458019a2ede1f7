//! Slice resolution
//!
//! A `SliceSpec` is what callers write (`2..6`, the last two records, a fraction of the
//! corpus). Resolving it against a sequence of known length gives a
//! `SliceRange`: absolute start, step and length over the underlying shards.
//! Resolving a `SliceSpec` inside an existing range composes the two, the same way
//! slicing a slice of a list does.

use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use super::errors::{SequenceError, SequenceResult};

/// One bound of a slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SliceBound {
    /// Position; negative values count from the end
    Index(isize),
    /// Fraction of the length in `[0, 1]`, resolved to `floor(len * f)`
    Fraction(f64),
}

impl SliceBound {
    fn resolve(self, len: usize) -> SequenceResult<usize> {
        match self {
            SliceBound::Index(i) if i < 0 => Ok(len.saturating_sub(i.unsigned_abs())),
            SliceBound::Index(i) => Ok((i as usize).min(len)),
            SliceBound::Fraction(f) if (0.0..=1.0).contains(&f) => {
                Ok(((len as f64 * f).floor() as usize).min(len))
            }
            SliceBound::Fraction(f) => Err(SequenceError::InvalidSlice(format!(
                "fraction {} is outside [0, 1]",
                f
            ))),
        }
    }
}

impl From<isize> for SliceBound {
    fn from(v: isize) -> Self {
        SliceBound::Index(v)
    }
}

impl From<f64> for SliceBound {
    fn from(v: f64) -> Self {
        SliceBound::Fraction(v)
    }
}

/// Unresolved `start:stop:step` slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceSpec {
    pub start: Option<SliceBound>,
    pub stop: Option<SliceBound>,
    pub step: usize,
}

impl SliceSpec {
    /// `start:stop:step` with optional bounds
    pub fn new(start: Option<SliceBound>, stop: Option<SliceBound>, step: usize) -> Self {
        Self { start, stop, step }
    }

    /// `start:stop`, negative positions counting from the end
    pub fn range(start: isize, stop: isize) -> Self {
        Self::new(Some(start.into()), Some(stop.into()), 1)
    }

    /// `start:`
    pub fn from_start(start: isize) -> Self {
        Self::new(Some(start.into()), None, 1)
    }

    /// The part of the sequence between two fractions of its length
    pub fn fraction(start: f64, stop: f64) -> Self {
        Self::new(Some(start.into()), Some(stop.into()), 1)
    }

    /// Same bounds with a different step
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }
}

impl Default for SliceSpec {
    fn default() -> Self {
        Self::new(None, None, 1)
    }
}

fn to_isize(v: usize) -> isize {
    isize::try_from(v).unwrap_or(isize::MAX)
}

impl From<Range<usize>> for SliceSpec {
    fn from(r: Range<usize>) -> Self {
        Self::range(to_isize(r.start), to_isize(r.end))
    }
}

impl From<RangeFrom<usize>> for SliceSpec {
    fn from(r: RangeFrom<usize>) -> Self {
        Self::from_start(to_isize(r.start))
    }
}

impl From<RangeTo<usize>> for SliceSpec {
    fn from(r: RangeTo<usize>) -> Self {
        Self::new(None, Some(to_isize(r.end).into()), 1)
    }
}

impl From<RangeFull> for SliceSpec {
    fn from(_: RangeFull) -> Self {
        Self::default()
    }
}

/// Resolved slice: absolute positions `start + i * step` for `i < len`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub start: usize,
    pub step: usize,
    pub len: usize,
}

impl SliceRange {
    /// Every position of a sequence of `len` records
    pub fn full(len: usize) -> Self {
        Self { start: 0, step: 1, len }
    }

    /// Exclusive end position, `start + len * step`
    pub fn stop(&self) -> usize {
        self.start + self.len * self.step
    }

    /// Absolute position of the `i`-th element
    pub fn position(&self, i: usize) -> Option<usize> {
        (i < self.len).then(|| self.start + i * self.step)
    }

    /// Resolves `spec` against this range's elements
    ///
    /// Bounds clamp to `[0, len]`; a stop before the start yields an empty
    /// range positioned at the start.
    pub fn apply(&self, spec: &SliceSpec) -> SequenceResult<SliceRange> {
        if spec.step == 0 {
            return Err(SequenceError::InvalidSlice("step must be positive".to_string()));
        }
        let start = match spec.start {
            Some(bound) => bound.resolve(self.len)?,
            None => 0,
        };
        let stop = match spec.stop {
            Some(bound) => bound.resolve(self.len)?,
            None => self.len,
        }
        .max(start);

        Ok(SliceRange {
            start: self.start + start * self.step,
            step: self.step * spec.step,
            len: (stop - start).div_ceil(spec.step),
        })
    }

    /// Normalizes a possibly negative index into this range
    pub fn index(&self, index: isize) -> SequenceResult<usize> {
        let local = if index < 0 {
            self.len.checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize).filter(|i| *i < self.len)
        };
        local.ok_or(SequenceError::OutOfBounds {
            index,
            len: self.len,
        })
    }
}
