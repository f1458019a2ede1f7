//! Append-only cache file
//!
//! ```text
//! header:  magic "DSCL" | version u32 | schema fingerprint (64 hex bytes)
//! frame:   compressed_len u32 | crc32 u32 | zstd(encoded record)
//! ```
//!
//! Opening scans every frame and maps each record id to the offset of its
//! latest frame. A frame cut short by a crash is truncated away. Appends
//! are batched: a batch either lands completely or the file is truncated
//! back to its previous length.
//!
//! Several handles, in one process or many, may share a cache file. Every
//! read and append holds an exclusive lock on the file; a handle that finds
//! the file length changed since its last access rescans it first.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::StoreConfig;
use crate::crash_point::{self, points};
use crate::observability::Logger;
use crate::schema::{decode_record, encode_record, Record, Schema};
use crate::storage::files::{self, FileLock};
use crate::storage::{compute_checksum, IndexKey, StoreError, StoreResult};

use super::{id_position, record_id};

const CACHE_MAGIC: &[u8; 4] = b"DSCL";
const CACHE_VERSION: u32 = 1;
const FINGERPRINT_LEN: usize = 64;
const HEADER_LEN: u64 = (4 + 4 + FINGERPRINT_LEN) as u64;
const FRAME_HEADER_LEN: usize = 8;

/// Persistent record cache keyed by record id
#[derive(Debug)]
pub struct CacheLog {
    path: PathBuf,
    schema: Schema,
    id_position: usize,
    file: File,
    /// File length as of the last scan or append by this handle
    len: u64,
    offsets: HashMap<IndexKey, u64>,
    config: StoreConfig,
}

enum Scan {
    Frame { id: IndexKey, next: u64 },
    End,
    Torn(String),
}

impl CacheLog {
    /// Opens or creates the cache at `path`
    ///
    /// A cache written for a different schema is reset.
    pub fn open(path: &Path, schema: &Schema, id_field: &str, config: StoreConfig) -> StoreResult<Self> {
        let id_position = id_position(schema, id_field)?;
        files::ensure_parent(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io_error(format!("Failed to open cache: {}", path.display()), e))?;

        let mut log = Self {
            path: path.to_path_buf(),
            schema: schema.clone(),
            id_position,
            file,
            len: 0,
            offsets: HashMap::new(),
            config,
        };
        let _lock = FileLock::exclusive(&log.file, &log.path)?;
        log.load()?;
        Ok(log)
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct cached ids known to this handle
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn contains(&self, id: &IndexKey) -> bool {
        self.offsets.contains_key(id)
    }

    fn io_err(&self, action: &str, e: std::io::Error) -> StoreError {
        StoreError::io_error(format!("Failed to {} cache: {}", action, self.path.display()), e)
    }

    fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(CACHE_MAGIC);
        header.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        let mut fingerprint = self.schema.fingerprint().into_bytes();
        fingerprint.resize(FINGERPRINT_LEN, b'0');
        header.extend_from_slice(&fingerprint);
        header
    }

    fn file_len(&self) -> StoreResult<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| self.io_err("stat", e))?
            .len())
    }

    /// Rescans the file when another handle changed it; caller holds the lock
    fn refresh(&mut self) -> StoreResult<()> {
        let file_len = self.file_len()?;
        if file_len == self.len {
            return Ok(());
        }
        let known = self.len.to_string();
        let found = file_len.to_string();
        Logger::trace(
            "CACHE_RESCAN",
            &[("known_len", known.as_str()), ("file_len", found.as_str())],
        );
        self.load()
    }

    fn load(&mut self) -> StoreResult<()> {
        let file_len = self.file_len()?;
        if file_len == 0 {
            return self.reset_file();
        }

        let expected = self.header();
        let mut found = vec![0u8; expected.len()];
        self.file.seek(SeekFrom::Start(0)).map_err(|e| self.io_err("seek", e))?;
        let header_ok = match self.file.read_exact(&mut found) {
            Ok(()) => found == expected,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(self.io_err("read", e)),
        };
        if !header_ok {
            let path = self.path.display().to_string();
            Logger::warn(
                "CACHE_RESET",
                &[("path", path.as_str()), ("reason", "header or schema fingerprint mismatch")],
            );
            return self.reset_file();
        }

        let mut offset = HEADER_LEN;
        let mut offsets = HashMap::new();
        let mut reader = BufReader::new(&self.file);
        loop {
            match self.scan_frame(&mut reader, offset, file_len)? {
                Scan::Frame { id, next } => {
                    offsets.insert(id, offset);
                    offset = next;
                }
                Scan::End => break,
                Scan::Torn(reason) => {
                    let at = offset.to_string();
                    let dropped = (file_len - offset).to_string();
                    Logger::warn(
                        "CACHE_TORN_TAIL_TRUNCATED",
                        &[
                            ("offset", at.as_str()),
                            ("dropped_bytes", dropped.as_str()),
                            ("reason", reason.as_str()),
                        ],
                    );
                    self.file.set_len(offset).map_err(|e| self.io_err("truncate", e))?;
                    break;
                }
            }
        }
        drop(reader);
        self.offsets = offsets;
        self.len = offset;

        let entries = self.offsets.len().to_string();
        Logger::trace("CACHE_OPENED", &[("entries", entries.as_str())]);
        Ok(())
    }

    fn scan_frame(&self, reader: &mut impl Read, offset: u64, file_len: u64) -> StoreResult<Scan> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        match read_full(reader, &mut header) {
            Ok(0) => return Ok(Scan::End),
            Ok(n) if n < FRAME_HEADER_LEN => return Ok(Scan::Torn("partial frame header".to_string())),
            Ok(_) => {}
            Err(e) => return Err(self.io_err("read", e)),
        }
        let (len, crc) = parse_frame_header(&header);
        let body_start = offset + FRAME_HEADER_LEN as u64;
        if len as u64 > file_len.saturating_sub(body_start) {
            return Ok(Scan::Torn("frame length exceeds file".to_string()));
        }
        let mut compressed = vec![0u8; len];
        match read_full(reader, &mut compressed) {
            Ok(n) if n < len => return Ok(Scan::Torn("partial frame body".to_string())),
            Ok(_) => {}
            Err(e) => return Err(self.io_err("read", e)),
        }
        if compute_checksum(&compressed) != crc {
            return Ok(Scan::Torn("frame checksum mismatch".to_string()));
        }
        let record = self.decode_frame(&compressed, offset)?;
        Ok(Scan::Frame {
            id: record_id(&record, self.id_position)?,
            next: body_start + len as u64,
        })
    }

    fn decode_frame(&self, compressed: &[u8], offset: u64) -> StoreResult<Record> {
        let encoded = zstd::decode_all(compressed)
            .map_err(|e| StoreError::corruption_at_offset(offset, format!("zstd: {}", e)))?;
        decode_record(&self.schema, &encoded)
    }

    fn reset_file(&mut self) -> StoreResult<()> {
        let header = self.header();
        self.file.set_len(0).map_err(|e| self.io_err("truncate", e))?;
        self.file.seek(SeekFrom::Start(0)).map_err(|e| self.io_err("seek", e))?;
        self.file.write_all(&header).map_err(|e| self.io_err("write", e))?;
        if self.config.fsync {
            files::sync_file(&self.file, &self.path)?;
        }
        self.offsets.clear();
        self.len = HEADER_LEN;
        Ok(())
    }

    /// Empties the cache
    pub fn clear(&mut self) -> StoreResult<()> {
        let _lock = FileLock::exclusive(&self.file, &self.path)?;
        self.reset_file()?;
        let path = self.path.display().to_string();
        Logger::info("CACHE_CLEARED", &[("path", path.as_str())]);
        Ok(())
    }

    fn read_at(&mut self, offset: u64) -> StoreResult<Record> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| self.io_err("seek", e))?;
        self.file.read_exact(&mut header).map_err(|e| self.io_err("read", e))?;
        let (len, crc) = parse_frame_header(&header);
        let body_start = offset + FRAME_HEADER_LEN as u64;
        if len as u64 > self.len.saturating_sub(body_start) {
            return Err(StoreError::corruption_at_offset(offset, "cache frame length exceeds file"));
        }
        let mut compressed = vec![0u8; len];
        self.file.read_exact(&mut compressed).map_err(|e| self.io_err("read", e))?;
        if compute_checksum(&compressed) != crc {
            return Err(StoreError::corruption_at_offset(offset, "cache frame checksum mismatch"));
        }
        self.decode_frame(&compressed, offset)
    }

    /// Cached records for `ids`; uncached ids are omitted
    ///
    /// A frame holding a record for a different id than the one it is
    /// indexed under is dropped from the index and counts as a miss.
    pub fn get_many(&mut self, ids: &[IndexKey]) -> StoreResult<HashMap<IndexKey, Record>> {
        let _lock = FileLock::exclusive(&self.file, &self.path)?;
        self.refresh()?;

        let mut hits: Vec<(u64, IndexKey)> = ids
            .iter()
            .filter_map(|id| self.offsets.get(id).map(|offset| (*offset, id.clone())))
            .collect();
        hits.sort_by_key(|(offset, _)| *offset);
        hits.dedup();

        let mut found = HashMap::with_capacity(hits.len());
        for (offset, id) in hits {
            let record = self.read_at(offset)?;
            if record_id(&record, self.id_position)? != id {
                let at = offset.to_string();
                let wanted = id.to_string();
                Logger::warn(
                    "CACHE_STALE_FRAME",
                    &[("offset", at.as_str()), ("id", wanted.as_str())],
                );
                self.offsets.remove(&id);
                continue;
            }
            found.insert(id, record);
        }
        Ok(found)
    }

    /// Appends `records` as one batch at the current end of the file
    ///
    /// On failure nothing from the batch remains in the file.
    pub fn append(&mut self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::new();
        let mut placed = Vec::with_capacity(records.len());
        for record in records {
            let id = record_id(record, self.id_position)?;
            let encoded = encode_record(&self.schema, record)?;
            let compressed = zstd::encode_all(encoded.as_slice(), self.config.compression_level)
                .map_err(|e| self.io_err("compress", e))?;
            let len = u32::try_from(compressed.len())
                .map_err(|_| StoreError::invalid_record("Cache frame exceeds u32 length"))?;
            placed.push((id, batch.len() as u64));
            batch.extend_from_slice(&len.to_le_bytes());
            batch.extend_from_slice(&compute_checksum(&compressed).to_le_bytes());
            batch.extend_from_slice(&compressed);
        }

        let _lock = FileLock::exclusive(&self.file, &self.path)?;
        self.refresh()?;
        let start = self.len;
        if let Err(e) = self.write_batch(start, &batch) {
            if let Err(rollback) = self.file.set_len(start) {
                let reason = rollback.to_string();
                Logger::error("CACHE_ROLLBACK_FAILED", &[("reason", reason.as_str())]);
            }
            return Err(e);
        }

        self.len = start + batch.len() as u64;
        self.offsets
            .extend(placed.into_iter().map(|(id, at)| (id, start + at)));
        let count = records.len().to_string();
        Logger::trace("CACHE_APPENDED", &[("records", count.as_str())]);
        Ok(())
    }

    fn write_batch(&mut self, start: u64, batch: &[u8]) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(start)).map_err(|e| self.io_err("seek", e))?;
        self.file.write_all(batch).map_err(|e| self.io_err("append to", e))?;
        crash_point::maybe_crash(points::CACHE_AFTER_APPEND);
        if self.config.fsync {
            files::sync_file(&self.file, &self.path)?;
        }
        Ok(())
    }
}

fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> (usize, u32) {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (len, crc)
}

/// Reads until `buf` is full or EOF, returning the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
