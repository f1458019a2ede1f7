//! Compressed, key-indexed record store
//!
//! A store named `<name>` owns these files:
//!
//! - `<name>.data`: zstd blocks of encoded records with a checkpoint table
//! - `<name>.idx.<field>`: sorted key index, one per indexed field
//! - `<name>.meta`: finalized marker with count and schema fingerprint
//!
//! # Build protocol
//!
//! 1. Stream the source once, appending to `.data.tmp` and collecting keys
//! 2. Write the sorted `.idx.<field>.tmp` files
//! 3. fsync, then rename data and index files into place
//! 4. Write and rename `.meta` last
//!
//! Until step 4 completes the store reports `StoreStatus::Absent`; a crash
//! anywhere before it leaves no finalized store and the next build starts
//! over. Built stores are immutable, so readers never lock.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::block::{BlockCursor, DataReader, DataWriter};
use super::errors::{StoreError, StoreResult};
use super::files::{self, TempFiles};
use super::key_index::{index_path, IndexBuilder, IndexKey, IndexReader};
use super::meta::{StoreMeta, FORMAT_VERSION};
use crate::config::StoreConfig;
use crate::crash_point::{self, points};
use crate::docstore::Docstore;
use crate::observability::{Logger, ObservationScope, Progress};
use crate::schema::{decode_record, encode_record, FieldType, Record, Schema};
use crate::sequence::{SeekableRecordIter, SequenceError, SequenceResult, Shard};

/// Boxed stream of records, as produced by a store source
pub type RecordIter = Box<dyn Iterator<Item = StoreResult<Record>>>;

/// Deterministic zero-argument record generator
pub type SourceFn = Box<dyn Fn() -> StoreResult<RecordIter>>;

/// Source replaying an in-memory record list
pub fn records_source(records: Vec<Record>) -> impl Fn() -> StoreResult<RecordIter> + 'static {
    move || Ok(Box::new(records.clone().into_iter().map(Ok)) as RecordIter)
}

/// On-disk state of a store relative to its expected layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    /// No finalized marker exists
    Absent,
    /// Finalized and matching the expected schema and indexes
    Built(StoreMeta),
    /// Finalized for a different schema or index layout
    Stale {
        /// Layout this handle expects
        expected: String,
        /// Layout recorded in the marker
        found: String,
    },
}

#[derive(Debug, Clone)]
struct IndexedField {
    name: String,
    position: usize,
}

/// Compressed record store with a unique lookup index and optional
/// secondary indexes
pub struct CompressedRecordStore {
    base: PathBuf,
    schema: Schema,
    lookup: IndexedField,
    secondary: Vec<IndexedField>,
    init_iter_fn: SourceFn,
    count_hint: Option<usize>,
    config: StoreConfig,
}

impl fmt::Debug for CompressedRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedRecordStore")
            .field("base", &self.base)
            .field("schema", &self.schema.name)
            .field("lookup_field", &self.lookup.name)
            .field("count_hint", &self.count_hint)
            .finish()
    }
}

impl CompressedRecordStore {
    /// Creates a handle on the store at `path`; nothing is read or written
    ///
    /// `lookup_field` must be a scalar field and gets a unique index. Each
    /// entry of `index_fields` other than the lookup field gets a secondary
    /// index and must be scalar or optional scalar.
    pub fn new<F>(
        path: impl Into<PathBuf>,
        schema: Schema,
        lookup_field: &str,
        index_fields: &[&str],
        init_iter_fn: F,
    ) -> StoreResult<Self>
    where
        F: Fn() -> StoreResult<RecordIter> + 'static,
    {
        schema.validate_structure()?;

        let lookup = resolve_field(&schema, lookup_field, false)?;
        let mut secondary: Vec<IndexedField> = Vec::new();
        for name in index_fields {
            if *name == lookup_field || secondary.iter().any(|f| f.name == *name) {
                continue;
            }
            secondary.push(resolve_field(&schema, name, true)?);
        }

        Ok(Self {
            base: path.into(),
            schema,
            lookup,
            secondary,
            init_iter_fn: Box::new(init_iter_fn),
            count_hint: None,
            config: StoreConfig::default(),
        })
    }

    /// Advisory record count shown before the store is built
    pub fn with_count_hint(mut self, count_hint: usize) -> Self {
        self.count_hint = Some(count_hint);
        self
    }

    /// Overrides build tunables
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Base path of the store files
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// Record schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Unique lookup field
    pub fn lookup_field(&self) -> &str {
        &self.lookup.name
    }

    /// Secondary index fields
    pub fn index_fields(&self) -> Vec<&str> {
        self.secondary.iter().map(|f| f.name.as_str()).collect()
    }

    fn meta_path(&self) -> PathBuf {
        files::with_suffix(&self.base, ".meta")
    }

    fn data_path(&self) -> PathBuf {
        files::with_suffix(&self.base, ".data")
    }

    fn index_file(&self, field: &str) -> PathBuf {
        index_path(&self.base, field)
    }

    fn all_index_fields(&self) -> impl Iterator<Item = &IndexedField> {
        std::iter::once(&self.lookup).chain(self.secondary.iter())
    }

    fn expected_layout(&self) -> String {
        format!(
            "v{} {} lookup={} index=[{}]",
            FORMAT_VERSION,
            self.schema.fingerprint(),
            self.lookup.name,
            self.index_fields().join(",")
        )
    }

    fn found_layout(meta: &StoreMeta) -> String {
        format!(
            "v{} {} lookup={} index=[{}]",
            meta.format_version,
            meta.schema_fingerprint,
            meta.lookup_field,
            meta.index_fields.join(",")
        )
    }

    /// Reads the finalized marker and compares it with this handle's layout
    pub fn status(&self) -> StoreResult<StoreStatus> {
        let meta = match StoreMeta::read(&self.meta_path())? {
            Some(meta) => meta,
            None => return Ok(StoreStatus::Absent),
        };
        let expected = self.expected_layout();
        let found = Self::found_layout(&meta);
        if expected == found {
            Ok(StoreStatus::Built(meta))
        } else {
            Ok(StoreStatus::Stale { expected, found })
        }
    }

    /// True iff a finalized store matching this schema exists
    pub fn built(&self) -> bool {
        matches!(self.status(), Ok(StoreStatus::Built(_)))
    }

    /// Record count of a finalized store; never triggers a build
    pub fn count(&self) -> Option<usize> {
        match self.status() {
            Ok(StoreStatus::Built(meta)) => usize::try_from(meta.record_count).ok(),
            _ => None,
        }
    }

    /// `count()` when built, otherwise the advisory hint
    pub fn count_or_hint(&self) -> Option<usize> {
        self.count().or(self.count_hint)
    }

    fn built_meta(&self) -> StoreResult<StoreMeta> {
        match self.status()? {
            StoreStatus::Built(meta) => Ok(meta),
            StoreStatus::Absent => Err(StoreError::incomplete_build(self.base.display())),
            StoreStatus::Stale { expected, found } => {
                Err(StoreError::schema_mismatch(&expected, &found))
            }
        }
    }

    /// Builds the store from `init_iter_fn` unless already finalized
    ///
    /// Fails with `DOCSTORE_SCHEMA_MISMATCH` when a store built for another
    /// layout exists; `clear()` it first.
    pub fn build(&self) -> StoreResult<()> {
        match self.status()? {
            StoreStatus::Built(_) => Ok(()),
            StoreStatus::Stale { expected, found } => {
                Err(StoreError::schema_mismatch(&expected, &found))
            }
            StoreStatus::Absent => {
                let source = (self.init_iter_fn)()?;
                self.build_from(source)
            }
        }
    }

    fn build_from(&self, source: RecordIter) -> StoreResult<()> {
        let path = self.base.display().to_string();
        let scope = ObservationScope::with_fields("STORE_BUILD", &[("path", path.as_str())]);

        match self.write_files(source) {
            Ok(meta) => {
                let records = meta.record_count.to_string();
                scope.complete_with_fields(&[("records", records.as_str())]);
                Ok(())
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn write_files(&self, source: RecordIter) -> StoreResult<StoreMeta> {
        files::ensure_parent(&self.base)?;
        let fsync = self.config.fsync;
        let mut temps = TempFiles::new();

        let data_final = self.data_path();
        let data_tmp = temps.track(files::tmp_path(&data_final));
        let mut data = DataWriter::create(&data_tmp, &self.config)?;

        let mut builders: Vec<(IndexBuilder, usize)> = self
            .all_index_fields()
            .enumerate()
            .map(|(i, f)| (IndexBuilder::new(f.name.clone(), i == 0), f.position))
            .collect();

        let mut progress = Progress::new("STORE_BUILD", self.count_hint);
        for item in source {
            let record = item?;
            self.schema.validate(&record)?;
            let encoded = encode_record(&self.schema, &record)?;
            let record_index = data.append(&encoded)?;

            for (builder, position) in builders.iter_mut() {
                match record.get(*position).and_then(IndexKey::from_value) {
                    Some(key) => builder.insert(&key, record_index),
                    None if builder.field() == self.lookup.name => {
                        return Err(StoreError::invalid_record(format!(
                            "Record {} has no value for lookup field '{}'",
                            record_index, self.lookup.name
                        )));
                    }
                    None => {}
                }
            }
            progress.tick();
        }
        let record_count = data.finish(fsync)?;

        let mut index_files = Vec::with_capacity(builders.len());
        for (builder, _) in builders {
            let final_path = self.index_file(builder.field());
            let tmp = temps.track(files::tmp_path(&final_path));
            builder.write_to(&tmp, fsync)?;
            index_files.push((tmp, final_path));
        }

        crash_point::maybe_crash(points::BUILD_BEFORE_DATA_RENAME);
        files::commit_rename(&data_tmp, &data_final, fsync)?;
        for (tmp, final_path) in &index_files {
            files::commit_rename(tmp, final_path, fsync)?;
        }

        let meta = StoreMeta {
            format_version: FORMAT_VERSION,
            schema_name: self.schema.name.clone(),
            schema_fingerprint: self.schema.fingerprint(),
            record_count,
            lookup_field: self.lookup.name.clone(),
            index_fields: self.index_fields().into_iter().map(String::from).collect(),
            checkpoint_interval: self.config.checkpoint_interval,
            built_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };
        meta.commit(&self.meta_path(), fsync)?;
        temps.disarm();
        Ok(meta)
    }

    /// Deletes every file of the store; the marker goes first
    pub fn clear(&self) -> StoreResult<()> {
        let meta = self.meta_path();
        files::remove_if_exists(&meta)?;
        files::remove_if_exists(&files::tmp_path(&meta))?;

        let data = self.data_path();
        files::remove_if_exists(&data)?;
        files::remove_if_exists(&files::tmp_path(&data))?;

        for field in self.all_index_fields() {
            let index = self.index_file(&field.name);
            files::remove_if_exists(&index)?;
            files::remove_if_exists(&files::tmp_path(&index))?;
        }
        Logger::info("STORE_CLEARED", &[("path", self.base.display().to_string().as_str())]);
        Ok(())
    }

    /// Fetches one record by lookup key, building first if needed
    pub fn get(&self, key: &IndexKey) -> StoreResult<Record> {
        self.build()?;
        let mut index = IndexReader::open(&self.index_file(&self.lookup.name))?;
        let record_index = index.find(key)?.ok_or_else(|| StoreError::not_found(key))?;
        self.fetch(&[record_index])?
            .pop()
            .ok_or_else(|| StoreError::data_corruption("Indexed record missing from data file"))
    }

    /// Fetches the records for every key present; misses are omitted
    ///
    /// Hits are read in record order so each block decompresses once.
    pub fn get_many(&self, keys: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        self.build()?;
        let mut index = IndexReader::open(&self.index_file(&self.lookup.name))?;
        let mut hits: Vec<(u64, &IndexKey)> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record_index) = index.find(key)? {
                hits.push((record_index, key));
            }
        }
        hits.sort_by_key(|(record_index, _)| *record_index);
        hits.dedup_by_key(|(record_index, _)| *record_index);

        let record_indices: Vec<u64> = hits.iter().map(|(i, _)| *i).collect();
        let records = self.fetch(&record_indices)?;
        Ok(hits
            .into_iter()
            .map(|(_, key)| key.clone())
            .zip(records)
            .collect())
    }

    /// Records whose `field` equals `key`, in build order
    pub fn lookup(&self, field: &str, key: &IndexKey) -> StoreResult<Vec<Record>> {
        if field == self.lookup.name {
            return Ok(self.get_many(std::slice::from_ref(key))?.into_values().collect());
        }
        if !self.secondary.iter().any(|f| f.name == field) {
            return Err(StoreError::invalid_schema(format!(
                "Field '{}' is not indexed in store {}",
                field,
                self.base.display()
            )));
        }
        self.build()?;
        let mut index = IndexReader::open(&self.index_file(field))?;
        let record_indices = index.find_all(key)?;
        self.fetch(&record_indices)
    }

    /// Decodes records at ascending `record_indices`
    fn fetch(&self, record_indices: &[u64]) -> StoreResult<Vec<Record>> {
        if record_indices.is_empty() {
            return Ok(Vec::new());
        }
        let mut reader = DataReader::open(&self.data_path())?;
        let mut records = Vec::with_capacity(record_indices.len());
        let mut current: Option<(usize, Vec<Vec<u8>>)> = None;

        for &record_index in record_indices {
            let block = reader.block_for(record_index).ok_or_else(|| {
                StoreError::data_corruption(format!(
                    "Index points at record {} past end of data",
                    record_index
                ))
            })?;
            let first = reader.checkpoints()[block].first_record;
            if current.as_ref().map(|(b, _)| *b) != Some(block) {
                current = Some((block, reader.read_block(block)?));
            }
            let encoded = current
                .as_ref()
                .and_then(|(_, block_records)| block_records.get((record_index - first) as usize))
                .ok_or_else(|| StoreError::data_corruption("Record missing from its block"))?;
            records.push(decode_record(&self.schema, encoded)?);
        }
        Ok(records)
    }

    /// Iterates every record in build order
    ///
    /// A finalized store is decompressed sequentially; without one the source
    /// is replayed directly and nothing is built.
    pub fn iter(&self) -> StoreResult<RecordStream> {
        match self.status()? {
            StoreStatus::Built(_) => {
                let cursor = BlockCursor::new(DataReader::open(&self.data_path())?);
                Ok(RecordStream::stored(cursor, self.schema.clone()))
            }
            StoreStatus::Absent => Ok(RecordStream::replay((self.init_iter_fn)()?)),
            StoreStatus::Stale { expected, found } => {
                Err(StoreError::schema_mismatch(&expected, &found))
            }
        }
    }

    /// Re-reads every block and index, checking checksums and counts
    pub fn verify(&self) -> StoreResult<u64> {
        let meta = self.built_meta()?;
        let mut reader = DataReader::open(&self.data_path())?;
        let records = reader.verify()?;
        if records != meta.record_count {
            return Err(StoreError::data_corruption(format!(
                "Metadata records {} records, data file holds {}",
                meta.record_count, records
            )));
        }
        for field in self.all_index_fields() {
            let mut index = IndexReader::open(&self.index_file(&field.name))?;
            index.verify()?;
            if index.is_unique() && index.len() != records {
                return Err(StoreError::data_corruption(format!(
                    "Lookup index holds {} keys for {} records",
                    index.len(),
                    records
                )));
            }
        }
        Ok(records)
    }
}

fn resolve_field(schema: &Schema, name: &str, allow_optional: bool) -> StoreResult<IndexedField> {
    let position = schema.field_index(name).ok_or_else(|| {
        StoreError::invalid_schema(format!(
            "Schema '{}' has no field '{}' to index",
            schema.name, name
        ))
    })?;
    let field_type = &schema.fields[position].field_type;
    let indexable = match field_type {
        FieldType::Optional { inner } if allow_optional => inner.is_scalar(),
        other => other.is_scalar(),
    };
    if !indexable {
        return Err(StoreError::invalid_schema(format!(
            "Field '{}' of type {} cannot be indexed",
            name,
            field_type.type_name()
        )));
    }
    Ok(IndexedField {
        name: name.to_string(),
        position,
    })
}

enum StreamSource {
    Stored { cursor: BlockCursor, schema: Schema },
    Replay(RecordIter),
}

/// Iterator over a store's records
///
/// Yields `Err` at most once; iteration ends after an error.
pub struct RecordStream {
    source: StreamSource,
    failed: bool,
}

impl RecordStream {
    fn stored(cursor: BlockCursor, schema: Schema) -> Self {
        Self {
            source: StreamSource::Stored { cursor, schema },
            failed: false,
        }
    }

    fn replay(iter: RecordIter) -> Self {
        Self {
            source: StreamSource::Replay(iter),
            failed: false,
        }
    }

    /// Whether records come from a finalized store rather than the source
    pub fn is_stored(&self) -> bool {
        matches!(self.source, StreamSource::Stored { .. })
    }
}

impl Iterator for RecordStream {
    type Item = StoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = match &mut self.source {
            StreamSource::Stored { cursor, schema } => match cursor.next_encoded() {
                Ok(Some(encoded)) => Some(decode_record(schema, &encoded)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
            StreamSource::Replay(iter) => iter.next(),
        };
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Seekable cursor over a finalized store
struct StoreCursor {
    cursor: Option<BlockCursor>,
    schema: Schema,
}

impl SeekableRecordIter for StoreCursor {
    fn next_record(&mut self) -> SequenceResult<Option<Record>> {
        let cursor = match self.cursor.as_mut() {
            Some(c) => c,
            None => return Ok(None),
        };
        match cursor.next_encoded()? {
            Some(encoded) => Ok(Some(decode_record(&self.schema, &encoded)?)),
            None => Ok(None),
        }
    }

    fn position(&self) -> usize {
        self.cursor.as_ref().map(|c| c.position() as usize).unwrap_or(0)
    }

    fn seek(&mut self, n: usize) -> SequenceResult<()> {
        match self.cursor.as_mut() {
            Some(cursor) => Ok(cursor.seek(n as u64)?),
            None => Err(SequenceError::Closed),
        }
    }

    fn close(&mut self) {
        self.cursor = None;
    }
}

impl Shard for CompressedRecordStore {
    fn len(&self) -> SequenceResult<usize> {
        self.build()?;
        Ok(self.built_meta()?.record_count as usize)
    }

    fn open(&self) -> SequenceResult<Box<dyn SeekableRecordIter>> {
        self.build()?;
        self.built_meta()?;
        let cursor = BlockCursor::new(DataReader::open(&self.data_path())?);
        Ok(Box::new(StoreCursor {
            cursor: Some(cursor),
            schema: self.schema.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("store:{}", self.base.display())
    }
}

impl Docstore for CompressedRecordStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn id_field(&self) -> &str {
        &self.lookup.name
    }

    fn get(&self, id: &IndexKey) -> StoreResult<Record> {
        CompressedRecordStore::get(self, id)
    }

    fn get_many(&self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        CompressedRecordStore::get_many(self, ids)
    }

    fn clear_cache(&self) -> StoreResult<()> {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Value};
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new(
            "Doc",
            vec![
                Field::string("id"),
                Field::string("text"),
                Field::new("lang", FieldType::optional(FieldType::String)),
            ],
        )
    }

    fn doc(id: &str, text: &str, lang: Option<&str>) -> Record {
        Record::new(vec![
            Value::from(id),
            Value::from(text),
            lang.map(Value::from).unwrap_or(Value::Null),
        ])
    }

    fn corpus(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let lang = if i % 3 == 0 { Some("en") } else if i % 3 == 1 { Some("fr") } else { None };
                doc(&format!("d{}", i), &format!("text of {}", i), lang)
            })
            .collect()
    }

    fn store(dir: &TempDir, records: Vec<Record>) -> CompressedRecordStore {
        CompressedRecordStore::new(
            dir.path().join("docs"),
            schema(),
            "id",
            &["id", "lang"],
            records_source(records),
        )
        .unwrap()
        .with_config(StoreConfig {
            checkpoint_interval: 4,
            ..StoreConfig::ephemeral()
        })
    }

    #[test]
    fn test_new_rejects_bad_fields() {
        let src = || records_source(vec![]);
        let err = CompressedRecordStore::new("/tmp/x", schema(), "missing", &[], src()).unwrap_err();
        assert_eq!(err.code(), crate::storage::StoreErrorCode::InvalidSchema);

        let err = CompressedRecordStore::new("/tmp/x", schema(), "lang", &[], src()).unwrap_err();
        assert!(err.message().contains("cannot be indexed"));

        assert!(CompressedRecordStore::new("/tmp/x", schema(), "id", &["lang"], src()).is_ok());
    }

    #[test]
    fn test_status_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, corpus(10)).with_count_hint(12);
        assert_eq!(store.status().unwrap(), StoreStatus::Absent);
        assert!(!store.built());
        assert_eq!(store.count(), None);
        assert_eq!(store.count_or_hint(), Some(12));

        store.build().unwrap();
        assert!(store.built());
        assert_eq!(store.count(), Some(10));
        assert_eq!(store.count_or_hint(), Some(10));
        assert_eq!(store.verify().unwrap(), 10);

        store.clear().unwrap();
        assert_eq!(store.status().unwrap(), StoreStatus::Absent);
        assert!(!dir.path().join("docs.data").exists());
        assert!(!dir.path().join("docs.idx.id").exists());
    }

    #[test]
    fn test_get_spans_blocks() {
        let dir = TempDir::new().unwrap();
        let records = corpus(19);
        let store = store(&dir, records.clone());
        for record in &records {
            let key = IndexKey::from_value(record.get(0).unwrap()).unwrap();
            assert_eq!(&store.get(&key).unwrap(), record);
        }
        assert!(store.get(&IndexKey::from("nope")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_many_batches_and_omits_misses() {
        let dir = TempDir::new().unwrap();
        let records = corpus(12);
        let store = store(&dir, records.clone());
        let keys: Vec<IndexKey> = ["d11", "x", "d0", "d5", "d0"].iter().map(|k| IndexKey::from(*k)).collect();
        let found = store.get_many(&keys).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[&IndexKey::from("d11")], records[11]);
        assert_eq!(found[&IndexKey::from("d0")], records[0]);
        assert_eq!(found[&IndexKey::from("d5")], records[5]);
    }

    #[test]
    fn test_secondary_lookup() {
        let dir = TempDir::new().unwrap();
        let records = corpus(9);
        let store = store(&dir, records.clone());

        let english = store.lookup("lang", &IndexKey::from("en")).unwrap();
        assert_eq!(english, vec![records[0].clone(), records[3].clone(), records[6].clone()]);
        assert!(store.lookup("lang", &IndexKey::from("de")).unwrap().is_empty());
        assert_eq!(store.lookup("id", &IndexKey::from("d4")).unwrap(), vec![records[4].clone()]);
        assert!(store.lookup("text", &IndexKey::from("x")).is_err());
    }

    #[test]
    fn test_iter_replays_source_until_built() {
        let dir = TempDir::new().unwrap();
        let records = corpus(7);
        let store = store(&dir, records.clone());

        let stream = store.iter().unwrap();
        assert!(!stream.is_stored());
        assert_eq!(stream.collect::<StoreResult<Vec<_>>>().unwrap(), records);
        assert!(!store.built());

        store.build().unwrap();
        let stream = store.iter().unwrap();
        assert!(stream.is_stored());
        assert_eq!(stream.collect::<StoreResult<Vec<_>>>().unwrap(), records);
    }

    #[test]
    fn test_duplicate_lookup_key_fails_build() {
        let dir = TempDir::new().unwrap();
        let records = vec![doc("a", "1", None), doc("b", "2", None), doc("a", "3", None)];
        let store = store(&dir, records);
        let err = store.build().unwrap_err();
        assert_eq!(err.code(), crate::storage::StoreErrorCode::DuplicateKey);
        assert!(!store.built());
        assert!(!dir.path().join("docs.data").exists());
        assert!(!dir.path().join("docs.data.tmp").exists());
    }

    #[test]
    fn test_invalid_record_fails_build() {
        let dir = TempDir::new().unwrap();
        let bad = Record::new(vec![Value::from("a"), Value::Int(1), Value::Null]);
        let store = store(&dir, vec![doc("z", "ok", None), bad]);
        assert_eq!(
            store.build().unwrap_err().code(),
            crate::storage::StoreErrorCode::InvalidRecord
        );
        assert_eq!(store.status().unwrap(), StoreStatus::Absent);
    }

    #[test]
    fn test_store_as_shard_seeks_by_checkpoint() {
        let dir = TempDir::new().unwrap();
        let records = corpus(10);
        let store = store(&dir, records.clone());
        assert_eq!(Shard::len(&store).unwrap(), 10);

        let mut cursor = store.open().unwrap();
        cursor.seek(6).unwrap();
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.next_record().unwrap().unwrap(), records[6]);
        cursor.seek(2).unwrap();
        assert_eq!(cursor.next_record().unwrap().unwrap(), records[2]);
        cursor.close();
        assert_eq!(cursor.next_record().unwrap(), None);
    }

    #[test]
    fn test_empty_corpus_builds() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, vec![]);
        store.build().unwrap();
        assert_eq!(store.count(), Some(0));
        assert!(store.get_many(&[IndexKey::from("a")]).unwrap().is_empty());
        assert_eq!(store.iter().unwrap().count(), 0);
    }
}
