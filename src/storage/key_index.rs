//! Persistent sorted key index
//!
//! One file per indexed field: `<name>.idx.<field>`.
//!
//! ```text
//! header   : magic "DSIX" | version u16 | flags u16 | entry_count u64
//! offsets  : entry_count x u64, absolute offset of each entry
//! entries  : [u32 key_len][key bytes][u64 record_index], sorted by key
//! footer   : crc32 u32 over all preceding bytes | magic "DSIE"
//! ```
//!
//! Lookups binary-search the offset table with seeks and never load the
//! whole file. The footer checksum is only checked by `verify`.

use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::checksum::{compute_checksum, ChecksumWriter};
use super::errors::{StoreError, StoreResult};
use super::files;
use crate::schema::Value;

const INDEX_MAGIC: &[u8; 4] = b"DSIX";
const INDEX_FOOTER_MAGIC: &[u8; 4] = b"DSIE";
const INDEX_VERSION: u16 = 1;
const HEADER_LEN: u64 = 16;
const FOOTER_LEN: u64 = 8;
const FLAG_UNIQUE: u16 = 1;

/// A scalar field value usable as an index key
///
/// Keys of one index always share a variant; `to_bytes` is order-preserving
/// within a variant, so the on-disk sort order matches `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Integer value
    Int(i64),
    /// Float value (stored as order-preserving bits)
    Float(u64),
    /// String value
    String(String),
    /// Byte string value
    Bytes(Vec<u8>),
}

const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_BYTES: u8 = 4;

impl IndexKey {
    /// Create a key from a float, using bits with a total ordering
    pub fn from_float(v: f64) -> Self {
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        IndexKey::Float(ordered)
    }

    /// The float a `Float` key was built from
    pub fn as_float(&self) -> Option<f64> {
        match self {
            IndexKey::Float(ordered) => {
                let bits = if (ordered >> 63) == 1 {
                    ordered ^ (1 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            _ => None,
        }
    }

    /// Key for a scalar value; `None` for null, sequences and records
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Int(v) => Some(IndexKey::Int(*v)),
            Value::Float(v) => Some(IndexKey::from_float(*v)),
            Value::Bytes(b) => Some(IndexKey::Bytes(b.clone())),
            _ => None,
        }
    }

    /// The value this key was built from
    pub fn to_value(&self) -> Value {
        match self {
            IndexKey::String(s) => Value::String(s.clone()),
            IndexKey::Int(v) => Value::Int(*v),
            IndexKey::Bytes(b) => Value::Bytes(b.clone()),
            IndexKey::Float(_) => Value::Float(self.as_float().unwrap_or(f64::NAN)),
        }
    }

    /// String content, if this is a string key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IndexKey::String(s) => Some(s),
            _ => None,
        }
    }

    /// Order-preserving, type-tagged byte encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            IndexKey::Int(v) => {
                let mut out = vec![TAG_INT];
                out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
                out
            }
            IndexKey::Float(bits) => {
                let mut out = vec![TAG_FLOAT];
                out.extend_from_slice(&bits.to_be_bytes());
                out
            }
            IndexKey::String(s) => {
                let mut out = Vec::with_capacity(s.len() + 1);
                out.push(TAG_STRING);
                out.extend_from_slice(s.as_bytes());
                out
            }
            IndexKey::Bytes(b) => {
                let mut out = Vec::with_capacity(b.len() + 1);
                out.push(TAG_BYTES);
                out.extend_from_slice(b);
                out
            }
        }
    }

    /// Decodes `to_bytes` output
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let corrupt = || StoreError::data_corruption("Invalid index key encoding");
        let (tag, body) = bytes.split_first().ok_or_else(corrupt)?;
        match *tag {
            TAG_INT => {
                let raw: [u8; 8] = body.try_into().map_err(|_| corrupt())?;
                Ok(IndexKey::Int((u64::from_be_bytes(raw) ^ (1 << 63)) as i64))
            }
            TAG_FLOAT => {
                let raw: [u8; 8] = body.try_into().map_err(|_| corrupt())?;
                Ok(IndexKey::Float(u64::from_be_bytes(raw)))
            }
            TAG_STRING => String::from_utf8(body.to_vec())
                .map(IndexKey::String)
                .map_err(|_| corrupt()),
            TAG_BYTES => Ok(IndexKey::Bytes(body.to_vec())),
            _ => Err(corrupt()),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::String(s) => write!(f, "{}", s),
            IndexKey::Int(v) => write!(f, "{}", v),
            IndexKey::Float(_) => write!(f, "{}", self.as_float().unwrap_or(f64::NAN)),
            IndexKey::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::String(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        IndexKey::String(v)
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Int(v)
    }
}

/// Index file path for `field` next to a store at `base`
///
/// Characters outside `[A-Za-z0-9_-]` are replaced so any field name maps
/// to a single file name.
pub fn index_path(base: &Path, field: &str) -> PathBuf {
    let safe: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    files::with_suffix(base, &format!(".idx.{}", safe))
}

/// Accumulates `(key, record_index)` pairs during a build
#[derive(Debug)]
pub struct IndexBuilder {
    field: String,
    unique: bool,
    entries: Vec<(Vec<u8>, u64)>,
}

impl IndexBuilder {
    pub fn new(field: impl Into<String>, unique: bool) -> Self {
        Self {
            field: field.into(),
            unique,
            entries: Vec::new(),
        }
    }

    /// Name of the indexed field
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Adds one key occurrence
    pub fn insert(&mut self, key: &IndexKey, record_index: u64) {
        self.entries.push((key.to_bytes(), record_index));
    }

    /// Sorts entries and writes the index file to `path`
    ///
    /// A unique index rejects repeated keys with `DOCSTORE_DUPLICATE_KEY`.
    pub fn write_to(mut self, path: &Path, fsync: bool) -> StoreResult<u64> {
        self.entries.sort();
        if self.unique {
            if let Some(pair) = self.entries.windows(2).find(|w| w[0].0 == w[1].0) {
                let key = IndexKey::from_bytes(&pair[0].0)?;
                return Err(StoreError::duplicate_key(&self.field, key));
            }
        }

        let file = File::create(path).map_err(|e| {
            StoreError::io_error(format!("Failed to create index file: {}", path.display()), e)
        })?;
        let mut writer = ChecksumWriter::new(BufWriter::new(file));
        let io_err = |e| StoreError::io_error(format!("Failed to write index file: {}", path.display()), e);

        let count = self.entries.len() as u64;
        let flags = if self.unique { FLAG_UNIQUE } else { 0 };
        writer.write_all(INDEX_MAGIC).map_err(io_err)?;
        writer.write_all(&INDEX_VERSION.to_le_bytes()).map_err(io_err)?;
        writer.write_all(&flags.to_le_bytes()).map_err(io_err)?;
        writer.write_all(&count.to_le_bytes()).map_err(io_err)?;

        let mut offset = HEADER_LEN + count * 8;
        for (key, _) in &self.entries {
            writer.write_all(&offset.to_le_bytes()).map_err(io_err)?;
            offset += 4 + key.len() as u64 + 8;
        }
        for (key, record_index) in &self.entries {
            writer.write_all(&(key.len() as u32).to_le_bytes()).map_err(io_err)?;
            writer.write_all(key).map_err(io_err)?;
            writer.write_all(&record_index.to_le_bytes()).map_err(io_err)?;
        }

        let crc = writer.checksum();
        let mut inner = writer.into_inner();
        inner.write_all(&crc.to_le_bytes()).map_err(io_err)?;
        inner.write_all(INDEX_FOOTER_MAGIC).map_err(io_err)?;
        let file = inner
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?;
        if fsync {
            files::sync_file(&file, path)?;
        }
        Ok(count)
    }
}

/// Read-only handle on an index file
#[derive(Debug)]
pub struct IndexReader {
    path: PathBuf,
    file: File,
    unique: bool,
    entry_count: u64,
    file_len: u64,
}

impl IndexReader {
    /// Opens an index file and validates its header
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            StoreError::io_error(format!("Failed to open index file: {}", path.display()), e)
        })?;
        let file_len = file
            .metadata()
            .map_err(|e| {
                StoreError::io_error(format!("Failed to stat index file: {}", path.display()), e)
            })?
            .len();
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)
            .map_err(|_| StoreError::corruption_at_offset(0, "Truncated index header"))?;
        if &header[0..4] != INDEX_MAGIC {
            return Err(StoreError::corruption_at_offset(0, "Invalid index magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != INDEX_VERSION {
            return Err(StoreError::data_corruption(format!(
                "Unsupported index version {}",
                version
            )));
        }
        let flags = u16::from_le_bytes([header[6], header[7]]);
        let mut count = [0u8; 8];
        count.copy_from_slice(&header[8..16]);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            unique: flags & FLAG_UNIQUE != 0,
            entry_count: u64::from_le_bytes(count),
            file_len,
        })
    }

    /// Whether the index rejects repeated keys
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Number of entries
    pub fn len(&self) -> u64 {
        self.entry_count
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn corrupt(&self, offset: u64, reason: &str) -> StoreError {
        StoreError::corruption_at_offset(offset, reason.to_string())
            .with_details(format!("index: {}, byte_offset: {}", self.path.display(), offset))
    }

    fn read_u64_at(&mut self, offset: u64) -> StoreResult<u64> {
        let mut buf = [0u8; 8];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|_| self.corrupt(offset, "Truncated index file"))?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_entry(&mut self, i: u64) -> StoreResult<(Vec<u8>, u64)> {
        let offset = self.read_u64_at(HEADER_LEN + i * 8)?;
        let mut len = [0u8; 4];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut len))
            .map_err(|_| self.corrupt(offset, "Truncated index entry"))?;
        let key_len = u64::from(u32::from_le_bytes(len));
        if key_len > self.file_len.saturating_sub(offset + 4 + 8) {
            return Err(self.corrupt(offset, "Index key length exceeds file"));
        }
        let mut key = vec![0u8; key_len as usize];
        let mut record = [0u8; 8];
        self.file
            .read_exact(&mut key)
            .and_then(|_| self.file.read_exact(&mut record))
            .map_err(|_| self.corrupt(offset, "Truncated index entry"))?;
        Ok((key, u64::from_le_bytes(record)))
    }

    /// First entry position whose key is not less than `key`
    fn lower_bound(&mut self, key: &[u8]) -> StoreResult<u64> {
        let (mut lo, mut hi) = (0u64, self.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (probe, _) = self.read_entry(mid)?;
            match probe.as_slice().cmp(key) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        Ok(lo)
    }

    /// Record index of the first entry with `key`
    pub fn find(&mut self, key: &IndexKey) -> StoreResult<Option<u64>> {
        let needle = key.to_bytes();
        let pos = self.lower_bound(&needle)?;
        if pos >= self.entry_count {
            return Ok(None);
        }
        let (probe, record_index) = self.read_entry(pos)?;
        Ok((probe == needle).then_some(record_index))
    }

    /// Record indices of every entry with `key`, ascending
    pub fn find_all(&mut self, key: &IndexKey) -> StoreResult<Vec<u64>> {
        let needle = key.to_bytes();
        let mut pos = self.lower_bound(&needle)?;
        let mut found = Vec::new();
        while pos < self.entry_count {
            let (probe, record_index) = self.read_entry(pos)?;
            if probe != needle {
                break;
            }
            found.push(record_index);
            pos += 1;
        }
        Ok(found)
    }

    /// Re-reads the whole file, checking the footer checksum and sort order
    pub fn verify(&mut self) -> StoreResult<()> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut bytes))
            .map_err(|e| {
                StoreError::io_error(format!("Failed to read index file: {}", self.path.display()), e)
            })?;
        if (bytes.len() as u64) < HEADER_LEN + FOOTER_LEN {
            return Err(self.corrupt(0, "Truncated index file"));
        }
        let body_len = bytes.len() - FOOTER_LEN as usize;
        let (body, footer) = bytes.split_at(body_len);
        if &footer[4..8] != INDEX_FOOTER_MAGIC {
            return Err(self.corrupt(body_len as u64, "Invalid index footer magic"));
        }
        let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        if compute_checksum(body) != expected {
            return Err(self.corrupt(body_len as u64, "Index checksum mismatch"));
        }

        let mut previous: Option<Vec<u8>> = None;
        for i in 0..self.entry_count {
            let (key, _) = self.read_entry(i)?;
            if let Some(prev) = &previous {
                let out_of_order = if self.unique { prev >= &key } else { prev > &key };
                if out_of_order {
                    return Err(self.corrupt(HEADER_LEN + i * 8, "Index entries out of order"));
                }
            }
            previous = Some(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_int_encoding_preserves_order() {
        let values = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            let a = IndexKey::Int(pair[0]).to_bytes();
            let b = IndexKey::Int(pair[1]).to_bytes();
            assert!(a < b, "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_float_encoding_preserves_order() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.0, f64::INFINITY];
        for pair in values.windows(2) {
            let a = IndexKey::from_float(pair[0]);
            let b = IndexKey::from_float(pair[1]);
            assert!(a.to_bytes() < b.to_bytes());
            assert!(a < b);
        }
        assert_eq!(IndexKey::from_float(-2.5).as_float(), Some(-2.5));
    }

    #[test]
    fn test_key_bytes_decode() {
        for key in [
            IndexKey::from("doc-1"),
            IndexKey::Int(-7),
            IndexKey::from_float(0.25),
            IndexKey::Bytes(vec![0, 255]),
        ] {
            assert_eq!(IndexKey::from_bytes(&key.to_bytes()).unwrap(), key);
        }
        assert!(IndexKey::from_bytes(&[]).is_err());
        assert!(IndexKey::from_bytes(&[9, 1]).is_err());
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(IndexKey::from_value(&Value::from("a")), Some(IndexKey::from("a")));
        assert_eq!(IndexKey::from_value(&Value::Null), None);
        assert_eq!(IndexKey::from_value(&Value::Sequence(vec![])), None);
    }

    #[test]
    fn test_index_path_sanitizes_field() {
        let path = index_path(Path::new("/d/docs"), "meta.lang");
        assert_eq!(path, PathBuf::from("/d/docs.idx.meta_lang"));
    }

    fn write_index(dir: &TempDir, unique: bool, keys: &[(&str, u64)]) -> StoreResult<PathBuf> {
        let path = dir.path().join("docs.idx.id");
        let mut builder = IndexBuilder::new("id", unique);
        for (key, index) in keys {
            builder.insert(&IndexKey::from(*key), *index);
        }
        builder.write_to(&path, false)?;
        Ok(path)
    }

    #[test]
    fn test_unique_index_lookup() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, true, &[("c", 2), ("a", 0), ("b", 1), ("aa", 3)]).unwrap();

        let mut reader = IndexReader::open(&path).unwrap();
        assert!(reader.is_unique());
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.find(&IndexKey::from("a")).unwrap(), Some(0));
        assert_eq!(reader.find(&IndexKey::from("aa")).unwrap(), Some(3));
        assert_eq!(reader.find(&IndexKey::from("c")).unwrap(), Some(2));
        assert_eq!(reader.find(&IndexKey::from("ab")).unwrap(), None);
        assert_eq!(reader.find(&IndexKey::from("zzz")).unwrap(), None);
        reader.verify().unwrap();
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let err = write_index(&dir, true, &[("a", 0), ("b", 1), ("a", 2)]).unwrap_err();
        assert_eq!(err.code(), crate::storage::StoreErrorCode::DuplicateKey);
        assert!(err.details().unwrap().contains("key: a"));
    }

    #[test]
    fn test_secondary_index_find_all() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, false, &[("en", 0), ("fr", 1), ("en", 2), ("en", 5)]).unwrap();

        let mut reader = IndexReader::open(&path).unwrap();
        assert!(!reader.is_unique());
        assert_eq!(reader.find_all(&IndexKey::from("en")).unwrap(), vec![0, 2, 5]);
        assert_eq!(reader.find_all(&IndexKey::from("fr")).unwrap(), vec![1]);
        assert!(reader.find_all(&IndexKey::from("de")).unwrap().is_empty());
        reader.verify().unwrap();
    }

    #[test]
    fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, true, &[]).unwrap();
        let mut reader = IndexReader::open(&path).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.find(&IndexKey::from("a")).unwrap(), None);
        reader.verify().unwrap();
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, true, &[("a", 0), ("b", 1)]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last_entry_byte = bytes.len() - FOOTER_LEN as usize - 1;
        bytes[last_entry_byte] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = IndexReader::open(&path).unwrap().verify().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.idx");
        fs::write(&path, [0u8; 32]).unwrap();
        assert!(IndexReader::open(&path).unwrap_err().is_fatal());
    }

    #[test]
    fn test_oversized_key_length_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, true, &[("a", 0)]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let entry = (HEADER_LEN + 8) as usize;
        bytes[entry..entry + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let err = IndexReader::open(&path).unwrap().find(&IndexKey::from("a")).unwrap_err();
        assert!(err.is_fatal());
    }
}
