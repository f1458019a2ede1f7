//! Record schemas, values and the binary record codec
//!
//! A `Schema` is an explicit, ordered field layout handed to a store at
//! construction time. Its fingerprint is persisted with every finalized
//! store so stale on-disk data is detected instead of misread.
//!
//! # Design Principles
//!
//! - Field order is significant (records are positional tuples)
//! - No coercion: a value either matches its field type or is rejected
//! - Lossless encoding (float bit patterns are preserved)

mod codec;
mod types;
mod value;

pub use codec::{decode_record, encode_record};
pub use types::{Field, FieldType, Schema};
pub use value::{Record, Value};
