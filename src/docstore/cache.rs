//! Caching decorator over a slow docstore

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use super::cache_log::CacheLog;
use super::Docstore;
use crate::config::StoreConfig;
use crate::observability::Logger;
use crate::schema::{Record, Schema};
use crate::storage::{IndexKey, StoreResult};

/// Docstore that answers from a local cache and fills it on misses
///
/// Misses are fetched from the inner docstore with one `get_many` call and
/// appended to the cache. Failures of the inner docstore propagate and
/// leave the cache untouched, so the next request retries. Handles are
/// single-threaded; concurrent users of one cache file each open their own.
pub struct CacheDocstore {
    inner: Box<dyn Docstore>,
    log: RefCell<CacheLog>,
}

impl CacheDocstore {
    /// Wraps `inner` with a cache file at `path`
    pub fn open(inner: Box<dyn Docstore>, path: &Path) -> StoreResult<Self> {
        Self::with_config(inner, path, StoreConfig::default())
    }

    pub fn with_config(inner: Box<dyn Docstore>, path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let log = CacheLog::open(path, inner.schema(), inner.id_field(), config)?;
        Ok(Self {
            inner,
            log: RefCell::new(log),
        })
    }

    /// The wrapped docstore
    pub fn inner(&self) -> &dyn Docstore {
        self.inner.as_ref()
    }

    /// Number of cached records
    pub fn cached(&self) -> usize {
        self.log.borrow().len()
    }
}

impl Docstore for CacheDocstore {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn id_field(&self) -> &str {
        self.inner.id_field()
    }

    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        let mut found = self.log.borrow_mut().get_many(ids)?;

        let mut missing: Vec<IndexKey> = ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return Ok(found);
        }

        let fetched = self.inner.get_many(&missing)?;
        let mut fresh: Vec<(&IndexKey, &Record)> = fetched.iter().collect();
        fresh.sort_by(|a, b| a.0.cmp(b.0));
        let records: Vec<Record> = fresh.into_iter().map(|(_, r)| r.clone()).collect();
        self.log.borrow_mut().append(&records)?;

        let hits = found.len().to_string();
        let misses = missing.len().to_string();
        let filled = fetched.len().to_string();
        Logger::trace(
            "CACHE_LOOKUP",
            &[
                ("hits", hits.as_str()),
                ("misses", misses.as_str()),
                ("filled", filled.as_str()),
            ],
        );

        found.extend(fetched);
        Ok(found)
    }

    fn clear_cache(&self) -> StoreResult<()> {
        self.log.borrow_mut().clear()
    }
}
