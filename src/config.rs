//! Store configuration
//!
//! `StoreConfig` carries the build tunables of a single store.
//! `DocstoreConfig` resolves where stores live and which tunables they get,
//! from the environment, and opens stores and caches with them:
//!
//! - `DOCSTORE_HOME`: root directory for stores (default `$HOME/.docstore`)
//! - `DOCSTORE_CHECKPOINT_INTERVAL`: records per checkpoint (default 128)
//! - `DOCSTORE_COMPRESSION_LEVEL`: zstd level, 1..=22 (default 3)
//!
//! Invalid values fall back to the defaults and are logged.

use std::path::{Path, PathBuf};

use crate::docstore::{CacheDocstore, Docstore};
use crate::observability::Logger;
use crate::schema::Schema;
use crate::storage::{CompressedRecordStore, RecordIter, StoreResult};

/// Default number of records between two checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 128;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Build tunables for a compressed record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Records per checkpoint; bounds the records decoded by one random lookup
    pub checkpoint_interval: usize,
    /// zstd compression level for data blocks and cache frames
    pub compression_level: i32,
    /// Whether finished files and their directory are fsynced before commit
    pub fsync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            fsync: true,
        }
    }
}

impl StoreConfig {
    /// Config with a custom checkpoint interval (clamped to at least 1)
    pub fn with_checkpoint_interval(interval: usize) -> Self {
        Self {
            checkpoint_interval: interval.max(1),
            ..Self::default()
        }
    }

    /// Config for throwaway stores: no fsync, fast compression
    pub fn ephemeral() -> Self {
        Self {
            compression_level: 1,
            fsync: false,
            ..Self::default()
        }
    }
}

/// Process-level configuration: where stores live and how they are built
#[derive(Debug, Clone)]
pub struct DocstoreConfig {
    /// Root directory under which store files are created
    pub home: PathBuf,
    /// Build tunables applied to stores created through this config
    pub store: StoreConfig,
}

impl DocstoreConfig {
    /// Config rooted at `home` with default tunables
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            store: StoreConfig::default(),
        }
    }

    /// Reads configuration from the environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let home = lookup("DOCSTORE_HOME")
            .map(PathBuf::from)
            .or_else(|| lookup("HOME").map(|h| Path::new(&h).join(".docstore")))
            .unwrap_or_else(|| PathBuf::from(".docstore"));

        let mut store = StoreConfig::default();
        if let Some(raw) = lookup("DOCSTORE_CHECKPOINT_INTERVAL") {
            match raw.parse::<usize>() {
                Ok(v) if v > 0 => store.checkpoint_interval = v,
                _ => Logger::warn(
                    "CONFIG_INVALID_VALUE",
                    &[("key", "DOCSTORE_CHECKPOINT_INTERVAL"), ("value", raw.as_str())],
                ),
            }
        }
        if let Some(raw) = lookup("DOCSTORE_COMPRESSION_LEVEL") {
            match raw.parse::<i32>() {
                Ok(v) if (1..=22).contains(&v) => store.compression_level = v,
                _ => Logger::warn(
                    "CONFIG_INVALID_VALUE",
                    &[("key", "DOCSTORE_COMPRESSION_LEVEL"), ("value", raw.as_str())],
                ),
            }
        }

        Self { home, store }
    }

    /// Base path for a named store (files become `<base>.meta`, `<base>.data`, ...)
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.home.join(name)
    }

    /// Cache file for a named docstore
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.home.join(format!("{}.cache", name))
    }

    /// Store `name` under `home`, built with this config's tunables
    pub fn store<F>(
        &self,
        name: &str,
        schema: Schema,
        lookup_field: &str,
        index_fields: &[&str],
        init_iter_fn: F,
    ) -> StoreResult<CompressedRecordStore>
    where
        F: Fn() -> StoreResult<RecordIter> + 'static,
    {
        let store = CompressedRecordStore::new(
            self.store_path(name),
            schema,
            lookup_field,
            index_fields,
            init_iter_fn,
        )?;
        Ok(store.with_config(self.store.clone()))
    }

    /// Cache named `name` under `home` in front of `inner`
    pub fn cache(&self, name: &str, inner: Box<dyn Docstore>) -> StoreResult<CacheDocstore> {
        CacheDocstore::with_config(inner, &self.cache_path(name), self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Record, Value};
    use crate::storage::{records_source, StoreMeta};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.checkpoint_interval, 128);
        assert_eq!(config.compression_level, 3);
        assert!(config.fsync);
    }

    #[test]
    fn test_checkpoint_interval_clamped() {
        assert_eq!(StoreConfig::with_checkpoint_interval(0).checkpoint_interval, 1);
        assert_eq!(StoreConfig::with_checkpoint_interval(7).checkpoint_interval, 7);
    }

    #[test]
    fn test_from_env_values() {
        let config = DocstoreConfig::from_lookup(lookup(&[
            ("DOCSTORE_HOME", "/data/stores"),
            ("DOCSTORE_CHECKPOINT_INTERVAL", "64"),
            ("DOCSTORE_COMPRESSION_LEVEL", "9"),
        ]));
        assert_eq!(config.home, PathBuf::from("/data/stores"));
        assert_eq!(config.store.checkpoint_interval, 64);
        assert_eq!(config.store.compression_level, 9);
        assert_eq!(config.store_path("msmarco"), PathBuf::from("/data/stores/msmarco"));
    }

    #[test]
    fn test_from_env_home_fallback() {
        let config = DocstoreConfig::from_lookup(lookup(&[("HOME", "/home/u")]));
        assert_eq!(config.home, PathBuf::from("/home/u/.docstore"));
    }

    #[test]
    fn test_from_env_invalid_values_use_defaults() {
        let config = DocstoreConfig::from_lookup(lookup(&[
            ("DOCSTORE_HOME", "/x"),
            ("DOCSTORE_CHECKPOINT_INTERVAL", "zero"),
            ("DOCSTORE_COMPRESSION_LEVEL", "99"),
        ]));
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_env_tunables_reach_built_store() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let config = DocstoreConfig::from_lookup(lookup(&[
            ("DOCSTORE_HOME", home.as_str()),
            ("DOCSTORE_CHECKPOINT_INTERVAL", "4"),
        ]));
        let schema = Schema::new("Doc", vec![Field::string("id")]);
        let records: Vec<Record> = (0..10).map(|i| Record::new(vec![Value::from(format!("r{}", i))])).collect();

        let store = config.store("docs", schema, "id", &[], records_source(records)).unwrap();
        store.build().unwrap();
        let meta = StoreMeta::read(&dir.path().join("docs.meta")).unwrap().unwrap();
        assert_eq!(meta.checkpoint_interval, 4);

        let cache = config.cache("docs", Box::new(store)).unwrap();
        assert_eq!(cache.get(&"r7".into()).unwrap().get(0), Some(&Value::from("r7")));
        assert!(dir.path().join("docs.cache").exists());
    }
}
