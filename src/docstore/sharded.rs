//! Docstore over raw shards
//!
//! Lookups stream shards instead of reading an index. A locator maps an id
//! to the shard expected to hold it, so a batch opens each shard at most
//! once and stops reading a shard as soon as all of its ids are resolved.
//! Ids the locator cannot place are resolved by one scan over all shards.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{id_position, record_id, Docstore};
use crate::observability::Logger;
use crate::schema::{Record, Schema};
use crate::sequence::{SequenceError, Shard};
use crate::storage::{IndexKey, StoreResult};

/// Maps an id to the index of the shard that should hold it
pub type Locator = Box<dyn Fn(&IndexKey) -> Option<usize>>;

pub struct ShardedDocstore {
    schema: Schema,
    id_field: String,
    id_position: usize,
    shards: Vec<Box<dyn Shard>>,
    locator: Locator,
}

impl ShardedDocstore {
    pub fn new(
        schema: Schema,
        id_field: &str,
        shards: Vec<Box<dyn Shard>>,
        locator: Locator,
    ) -> StoreResult<Self> {
        let id_position = id_position(&schema, id_field)?;
        Ok(Self {
            schema,
            id_field: id_field.to_string(),
            id_position,
            shards,
            locator,
        })
    }

    /// Docstore without a locator; every batch scans the shards in order
    pub fn unlocated(schema: Schema, id_field: &str, shards: Vec<Box<dyn Shard>>) -> StoreResult<Self> {
        Self::new(schema, id_field, shards, Box::new(|_: &IndexKey| -> Option<usize> { None }))
    }

    pub fn shards(&self) -> &[Box<dyn Shard>] {
        &self.shards
    }

    /// Streams shard `index`, moving records whose id is in `wanted` to `found`
    fn scan(
        &self,
        index: usize,
        wanted: &mut HashSet<IndexKey>,
        found: &mut HashMap<IndexKey, Record>,
    ) -> StoreResult<()> {
        let mut cursor = self.shards[index].open().map_err(SequenceError::into_store_error)?;
        let result = loop {
            if wanted.is_empty() {
                break Ok(());
            }
            match cursor.next_record() {
                Ok(Some(record)) => {
                    let id = match record_id(&record, self.id_position) {
                        Ok(id) => id,
                        Err(e) => break Err(e),
                    };
                    if wanted.remove(&id) {
                        found.insert(id, record);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into_store_error()),
            }
        };
        cursor.close();
        result
    }
}

impl Docstore for ShardedDocstore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn id_field(&self) -> &str {
        &self.id_field
    }

    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        let mut by_shard: BTreeMap<usize, HashSet<IndexKey>> = BTreeMap::new();
        let mut unlocated: HashSet<IndexKey> = HashSet::new();
        for id in ids {
            match (self.locator)(id) {
                Some(index) if index < self.shards.len() => {
                    by_shard.entry(index).or_default().insert(id.clone());
                }
                _ => {
                    unlocated.insert(id.clone());
                }
            }
        }

        let mut found = HashMap::with_capacity(ids.len());
        let mut opened = 0usize;
        for (index, mut wanted) in by_shard {
            self.scan(index, &mut wanted, &mut found)?;
            opened += 1;
        }
        for index in 0..self.shards.len() {
            if unlocated.is_empty() {
                break;
            }
            self.scan(index, &mut unlocated, &mut found)?;
            opened += 1;
        }

        let requested = ids.len().to_string();
        let opened = opened.to_string();
        Logger::trace(
            "SHARDED_LOOKUP",
            &[("requested", requested.as_str()), ("shards_opened", opened.as_str())],
        );
        Ok(found)
    }
}
