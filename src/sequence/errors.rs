//! # Sequence Errors

use thiserror::Error;

use crate::storage::StoreError;

/// Result type for sequence operations
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Errors raised while slicing, indexing or iterating a sequence
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Index {index} out of range for sequence of length {len}")]
    OutOfBounds { index: isize, len: usize },

    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Cannot seek backward from record {from} to {to}")]
    InvalidSeek { from: usize, to: usize },

    #[error("Shard {shard} ended at record {found}, expected {expected} records")]
    ShortShard {
        shard: String,
        expected: usize,
        found: usize,
    },

    #[error("Cursor is closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SequenceError {
    /// Whether this is an index bounds error
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self, SequenceError::OutOfBounds { .. })
    }

    /// The underlying store error, if any
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            SequenceError::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Converts to a store error for callers on the `Docstore` side
    pub fn into_store_error(self) -> StoreError {
        match self {
            SequenceError::Store(e) => e,
            other => StoreError::source_failed(other.to_string()),
        }
    }
}
