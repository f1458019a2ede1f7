//! Concrete shards
//!
//! `MemoryShard` wraps records already in memory. `JsonLinesShard` reads a
//! file with one JSON array per line, optionally zstd compressed (`.zst`),
//! and caches its line count in a `<file>.count` sidecar.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::errors::{SequenceError, SequenceResult};
use super::shard::{SeekableRecordIter, Shard};
use crate::observability::Logger;
use crate::schema::{Record, Schema};
use crate::storage::files;
use crate::storage::{StoreError, StoreResult};

/// Shard over records held in memory
#[derive(Debug, Clone)]
pub struct MemoryShard {
    records: Rc<Vec<Record>>,
    label: String,
}

impl MemoryShard {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Rc::new(records),
            label: "memory".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Shard for MemoryShard {
    fn len(&self) -> SequenceResult<usize> {
        Ok(self.records.len())
    }

    fn open(&self) -> SequenceResult<Box<dyn SeekableRecordIter>> {
        Ok(Box::new(MemoryCursor {
            records: Rc::clone(&self.records),
            position: 0,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

struct MemoryCursor {
    records: Rc<Vec<Record>>,
    position: usize,
    closed: bool,
}

impl SeekableRecordIter for MemoryCursor {
    fn next_record(&mut self) -> SequenceResult<Option<Record>> {
        if self.closed {
            return Err(SequenceError::Closed);
        }
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, n: usize) -> SequenceResult<()> {
        if self.closed {
            return Err(SequenceError::Closed);
        }
        self.position = n.min(self.records.len());
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Shard over a JSON-lines file of records laid out by `schema`
#[derive(Debug, Clone)]
pub struct JsonLinesShard {
    path: PathBuf,
    schema: Schema,
}

impl JsonLinesShard {
    pub fn new(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the cached line count
    pub fn count_path(&self) -> PathBuf {
        files::with_suffix(&self.path, ".count")
    }

    fn is_compressed(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "zst")
    }

    fn reader(&self) -> StoreResult<Box<dyn BufRead>> {
        let file = File::open(&self.path).map_err(|e| {
            StoreError::io_error(format!("Failed to open shard: {}", self.path.display()), e)
        })?;
        if self.is_compressed() {
            let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| {
                StoreError::io_error(
                    format!("Failed to start zstd stream: {}", self.path.display()),
                    e,
                )
            })?;
            Ok(Box::new(BufReader::new(decoder)))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }

    fn cached_count(&self) -> Option<usize> {
        let text = fs::read_to_string(self.count_path()).ok()?;
        text.trim().parse().ok()
    }

    fn count_lines(&self) -> StoreResult<usize> {
        let mut reader = self.reader()?;
        let mut line = String::new();
        let mut count = 0;
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| {
                StoreError::io_error(format!("Failed to read shard: {}", self.path.display()), e)
            })?;
            if read == 0 {
                return Ok(count);
            }
            if !line.trim().is_empty() {
                count += 1;
            }
        }
    }

    fn store_count(&self, count: usize) -> StoreResult<()> {
        let target = self.count_path();
        let tmp = files::tmp_path(&target);
        fs::write(&tmp, count.to_string()).map_err(|e| {
            StoreError::io_error(format!("Failed to write count: {}", tmp.display()), e)
        })?;
        files::commit_rename(&tmp, &target, false)
    }
}

impl Shard for JsonLinesShard {
    fn len(&self) -> SequenceResult<usize> {
        if let Some(count) = self.cached_count() {
            return Ok(count);
        }
        let count = self.count_lines()?;
        // A read-only directory only loses the cache
        if let Err(e) = self.store_count(count) {
            let reason = e.to_string();
            Logger::warn("SHARD_COUNT_NOT_CACHED", &[("reason", reason.as_str())]);
        }
        Ok(count)
    }

    fn open(&self) -> SequenceResult<Box<dyn SeekableRecordIter>> {
        Ok(Box::new(JsonLinesCursor {
            reader: Some(self.reader()?),
            schema: self.schema.clone(),
            label: self.describe(),
            line: String::new(),
            position: 0,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct JsonLinesCursor {
    reader: Option<Box<dyn BufRead>>,
    schema: Schema,
    label: String,
    line: String,
    position: usize,
}

impl JsonLinesCursor {
    /// Advances to the next non-blank line; false at end of file
    fn advance(&mut self) -> SequenceResult<bool> {
        let reader = self.reader.as_mut().ok_or(SequenceError::Closed)?;
        loop {
            self.line.clear();
            let read = reader.read_line(&mut self.line).map_err(|e| {
                StoreError::io_error(format!("Failed to read shard: {}", self.label), e)
            })?;
            if read == 0 {
                return Ok(false);
            }
            if !self.line.trim().is_empty() {
                return Ok(true);
            }
        }
    }
}

impl SeekableRecordIter for JsonLinesCursor {
    fn next_record(&mut self) -> SequenceResult<Option<Record>> {
        if !self.advance()? {
            return Ok(None);
        }
        let json: serde_json::Value = serde_json::from_str(self.line.trim()).map_err(|e| {
            StoreError::invalid_record(format!("Malformed JSON in {}", self.label))
                .with_details(format!("line {}: {}", self.position + 1, e))
        })?;
        let record = Record::from_json(&json, &self.schema.fields)?;
        self.position += 1;
        Ok(Some(record))
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, n: usize) -> SequenceResult<()> {
        if n < self.position {
            return Err(SequenceError::InvalidSeek {
                from: self.position,
                to: n,
            });
        }
        while self.position < n {
            if !self.advance()? {
                break;
            }
            self.position += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Writes `records` as JSON lines, zstd compressed when the path ends in `.zst`
pub fn write_json_lines(path: &Path, records: &[Record]) -> StoreResult<()> {
    let io_err = |e: std::io::Error| {
        StoreError::io_error(format!("Failed to write shard: {}", path.display()), e)
    };
    files::ensure_parent(path)?;
    let file = File::create(path).map_err(io_err)?;
    let mut out: Box<dyn Write> = if path.extension().is_some_and(|ext| ext == "zst") {
        let encoder = zstd::stream::write::Encoder::new(file, 3).map_err(io_err)?;
        Box::new(BufWriter::new(encoder.auto_finish()))
    } else {
        Box::new(BufWriter::new(file))
    };
    for record in records {
        serde_json::to_writer(&mut out, &record.to_json()).map_err(|e| {
            StoreError::invalid_record(format!("Failed to serialize record: {}", e))
        })?;
        out.write_all(b"\n").map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    drop(out);
    files::remove_if_exists(&files::with_suffix(path, ".count"))
}
