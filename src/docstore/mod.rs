//! Key to record lookup over a document corpus
//!
//! `Docstore` is independent of the physical format. A built
//! `CompressedRecordStore` answers from its index; slower sources are
//! wrapped in a `CacheDocstore`.

mod cache;
mod cache_log;
mod prefixed;
mod sharded;

use std::collections::HashMap;

use crate::schema::{Record, Schema};
use crate::storage::{IndexKey, StoreError, StoreResult};

pub use cache::CacheDocstore;
pub use cache_log::CacheLog;
pub use prefixed::PrefixedDocstore;
pub use sharded::{Locator, ShardedDocstore};

/// Random access by id over a document corpus
pub trait Docstore {
    /// Layout of the records this docstore returns
    fn schema(&self) -> &Schema;

    /// Name of the unique id field
    fn id_field(&self) -> &str;

    /// Records for every id present; missing ids are omitted
    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>>;

    /// Record for `id`; a miss is `NotFound`
    fn get(&self, id: &IndexKey) -> StoreResult<Record> {
        self.get_many(std::slice::from_ref(id))?
            .remove(id)
            .ok_or_else(|| StoreError::not_found(id))
    }

    /// Drops any locally cached state; the default has none
    fn clear_cache(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl<D: Docstore + ?Sized> Docstore for Box<D> {
    fn schema(&self) -> &Schema {
        (**self).schema()
    }

    fn id_field(&self) -> &str {
        (**self).id_field()
    }

    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        (**self).get_many(ids)
    }

    fn get(&self, id: &IndexKey) -> StoreResult<Record> {
        (**self).get(id)
    }

    fn clear_cache(&self) -> StoreResult<()> {
        (**self).clear_cache()
    }
}

/// Position of the id field in `schema`
pub(crate) fn id_position(schema: &Schema, id_field: &str) -> StoreResult<usize> {
    schema.field_index(id_field).ok_or_else(|| {
        StoreError::invalid_schema(format!(
            "Id field '{}' is not defined in schema '{}'",
            id_field, schema.name
        ))
    })
}

/// Id of `record`, read from the field at `position`
pub(crate) fn record_id(record: &Record, position: usize) -> StoreResult<IndexKey> {
    record
        .get(position)
        .and_then(IndexKey::from_value)
        .ok_or_else(|| StoreError::invalid_record("Record id is missing or not a scalar"))
}
