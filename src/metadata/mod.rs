//! Corpus metadata computed over a store
//!
//! Calculators are plain functions registered by name. Each one receives a
//! fresh `iter()` stream of the store and returns a JSON value; the registry
//! collects them into one object keyed by name.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::observability::ObservationScope;
use crate::storage::{CompressedRecordStore, RecordStream, StoreError, StoreResult};

/// A metadata calculator over one full pass of a store
pub type Calculator = fn(&mut RecordStream) -> StoreResult<serde_json::Value>;

/// Named calculators, run in name order
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    calculators: BTreeMap<String, Calculator>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `count` and `content_sha256`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("count", count_records);
        registry.register("content_sha256", content_sha256);
        registry
    }

    /// Registers `calculator` under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, calculator: Calculator) {
        self.calculators.insert(name.to_string(), calculator);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.calculators.keys().map(String::as_str)
    }

    /// Runs every calculator over `store`
    pub fn calc(&self, store: &CompressedRecordStore) -> StoreResult<serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (name, calculator) in &self.calculators {
            let scope = ObservationScope::with_fields("METADATA_CALC", &[("name", name.as_str())]);
            let mut stream = store.iter()?;
            match calculator(&mut stream) {
                Ok(value) => {
                    scope.complete();
                    out.insert(name.clone(), value);
                }
                Err(e) => {
                    scope.fail(&e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(serde_json::Value::Object(out))
    }
}

/// Number of records
pub fn count_records(stream: &mut RecordStream) -> StoreResult<serde_json::Value> {
    let mut count: u64 = 0;
    for record in stream {
        record?;
        count += 1;
    }
    Ok(serde_json::Value::from(count))
}

/// SHA-256 over the JSON form of every record, one per line, hex encoded
pub fn content_sha256(stream: &mut RecordStream) -> StoreResult<serde_json::Value> {
    let mut hasher = Sha256::new();
    for record in stream {
        let line = serde_json::to_vec(&record?.to_json())
            .map_err(|e| StoreError::invalid_record(format!("Failed to serialize record: {}", e)))?;
        hasher.update(&line);
        hasher.update(b"\n");
    }
    let hex: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
    Ok(serde_json::Value::String(hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::schema::{Field, Record, Schema, Value};
    use crate::storage::records_source;
    use tempfile::TempDir;

    fn store(dir: &TempDir, texts: &[&str]) -> CompressedRecordStore {
        let schema = Schema::new("Doc", vec![Field::string("id"), Field::string("text")]);
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Record::new(vec![Value::from(i.to_string()), Value::from(*t)]))
            .collect();
        CompressedRecordStore::new(dir.path().join("docs"), schema, "id", &[], records_source(records))
            .unwrap()
            .with_config(StoreConfig::ephemeral())
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let meta = MetadataRegistry::with_defaults().calc(&store(&dir, &["a", "b", "c"])).unwrap();
        assert_eq!(meta["count"], serde_json::json!(3));
        assert_eq!(meta["content_sha256"].as_str().unwrap().len(), 64);
        let keys: Vec<&String> = meta.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["content_sha256", "count"]);
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let registry = MetadataRegistry::with_defaults();
        let first = registry.calc(&store(&a, &["x", "y"])).unwrap();
        let second = registry.calc(&store(&b, &["x", "z"])).unwrap();
        assert_eq!(first["count"], second["count"]);
        assert_ne!(first["content_sha256"], second["content_sha256"]);
    }

    #[test]
    fn test_custom_calculator() {
        fn longest(stream: &mut RecordStream) -> StoreResult<serde_json::Value> {
            let mut max = 0usize;
            for record in stream {
                if let Some(text) = record?.get(1).and_then(Value::as_str) {
                    max = max.max(text.len());
                }
            }
            Ok(serde_json::json!(max))
        }
        let dir = TempDir::new().unwrap();
        let mut registry = MetadataRegistry::new();
        registry.register("longest_text", longest);
        let meta = registry.calc(&store(&dir, &["ab", "abcd"])).unwrap();
        assert_eq!(meta["longest_text"], serde_json::json!(4));
    }
}
