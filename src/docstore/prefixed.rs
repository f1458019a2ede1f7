//! Several docstores behind one id space, told apart by id prefix

use std::collections::HashMap;

use super::{id_position, Docstore};
use crate::schema::{Record, Schema, Value};
use crate::storage::{IndexKey, StoreError, StoreResult};

struct PrefixedEntry {
    prefix: String,
    store: Box<dyn Docstore>,
    /// The inner store already returns ids carrying the prefix
    has_prefix: bool,
}

/// Routes each id to the docstore whose prefix it starts with
///
/// Unless an entry already stores prefixed ids, the prefix is stripped
/// before delegating and always put back on the id field of returned
/// records, even when the inner id happens to start with the prefix too.
pub struct PrefixedDocstore {
    schema: Schema,
    id_field: String,
    id_position: usize,
    entries: Vec<PrefixedEntry>,
}

impl PrefixedDocstore {
    /// Combined docstore over records laid out by `schema`
    pub fn new(schema: Schema, id_field: &str) -> StoreResult<Self> {
        let id_position = id_position(&schema, id_field)?;
        Ok(Self {
            schema,
            id_field: id_field.to_string(),
            id_position,
            entries: Vec::new(),
        })
    }

    /// Adds `store` under `prefix`; its schema must match
    pub fn with_store(
        mut self,
        prefix: impl Into<String>,
        store: Box<dyn Docstore>,
        has_prefix: bool,
    ) -> StoreResult<Self> {
        let expected = self.schema.fingerprint();
        let found = store.schema().fingerprint();
        if expected != found {
            return Err(StoreError::schema_mismatch(&expected, &found));
        }
        self.entries.push(PrefixedEntry {
            prefix: prefix.into(),
            store,
            has_prefix,
        });
        Ok(self)
    }

    /// Re-keys a record returned by `entry` under the id it was requested as
    fn prefixed(&self, entry: &PrefixedEntry, key: IndexKey, record: Record) -> (IndexKey, Record) {
        if entry.has_prefix {
            return (key, record);
        }
        let id = format!("{}{}", entry.prefix, key.as_str().unwrap_or_default());
        let record = record.with_value(self.id_position, Value::from(id.as_str()));
        (IndexKey::from(id), record)
    }
}

impl Docstore for PrefixedDocstore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn id_field(&self) -> &str {
        &self.id_field
    }

    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        let mut found = HashMap::new();
        for entry in &self.entries {
            let routed: Vec<IndexKey> = ids
                .iter()
                .filter_map(IndexKey::as_str)
                .filter(|id| id.starts_with(&entry.prefix))
                .map(|id| {
                    if entry.has_prefix {
                        IndexKey::from(id)
                    } else {
                        IndexKey::from(&id[entry.prefix.len()..])
                    }
                })
                .collect();
            if routed.is_empty() {
                continue;
            }
            for (key, record) in entry.store.get_many(&routed)? {
                let (key, record) = self.prefixed(entry, key, record);
                found.insert(key, record);
            }
        }
        Ok(found)
    }

    fn clear_cache(&self) -> StoreResult<()> {
        for entry in &self.entries {
            entry.store.clear_cache()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::docstore::ShardedDocstore;
    use crate::sequence::{MemoryShard, Shard};

    fn schema() -> Schema {
        Schema::new("Doc", vec![Field::string("id"), Field::string("text")])
    }

    fn store(ids: &[&str]) -> Box<dyn Docstore> {
        let records = ids
            .iter()
            .map(|id| Record::new(vec![Value::from(*id), Value::from(format!("body {}", id))]))
            .collect();
        let shard: Box<dyn Shard> = Box::new(MemoryShard::new(records));
        Box::new(ShardedDocstore::unlocated(schema(), "id", vec![shard]).unwrap())
    }

    #[test]
    fn test_prefix_routing() {
        let combined = PrefixedDocstore::new(schema(), "id")
            .unwrap()
            .with_store("web_", store(&["1", "2"]), false)
            .unwrap()
            .with_store("wiki_", store(&["wiki_1"]), true)
            .unwrap();

        let found = combined
            .get_many(&["web_2".into(), "wiki_1".into(), "news_1".into()])
            .unwrap();
        assert_eq!(found.len(), 2);
        let web = &found[&IndexKey::from("web_2")];
        assert_eq!(web.get(0), Some(&Value::from("web_2")));
        assert_eq!(web.get(1), Some(&Value::from("body 2")));
        assert_eq!(found[&IndexKey::from("wiki_1")].get(0), Some(&Value::from("wiki_1")));
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let other = Schema::new("Doc", vec![Field::string("id")]);
        let result = PrefixedDocstore::new(other, "id").unwrap().with_store("a", store(&["1"]), false);
        assert!(result.err().unwrap().is_schema_mismatch());
    }

    #[test]
    fn test_inner_id_starting_with_prefix() {
        let combined = PrefixedDocstore::new(schema(), "id")
            .unwrap()
            .with_store("d", store(&["d1", "1"]), false)
            .unwrap();

        let found = combined.get_many(&["dd1".into(), "d1".into()]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&IndexKey::from("dd1")].get(0), Some(&Value::from("dd1")));
        assert_eq!(found[&IndexKey::from("dd1")].get(1), Some(&Value::from("body d1")));
        assert_eq!(found[&IndexKey::from("d1")].get(1), Some(&Value::from("body 1")));
        assert_eq!(combined.get(&"dd1".into()).unwrap().get(0), Some(&Value::from("dd1")));
    }
}
