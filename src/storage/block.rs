//! Compressed, checkpointed data file
//!
//! ```text
//! header      : magic "DSDT" | version u16 | reserved u16 | checkpoint_interval u32
//! block*      : [u32 compressed_len][u32 record_count][u32 crc32][zstd bytes]
//! checkpoints : n x (u64 byte_offset, u64 first_record_index)
//! footer      : table_offset u64 | checkpoint_count u64 | record_count u64
//!               | table crc32 u32 | magic "DSFT"
//! ```
//!
//! Each block holds up to `checkpoint_interval` records, each framed as
//! `[u32 len][encoded record]` before compression. Every block start is a
//! checkpoint, so reaching any record decompresses one block and skips
//! fewer than `checkpoint_interval` records.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::checksum::compute_checksum;
use super::errors::{StoreError, StoreResult};
use super::files;
use crate::config::StoreConfig;
use crate::observability::Logger;

const DATA_MAGIC: &[u8; 4] = b"DSDT";
const FOOTER_MAGIC: &[u8; 4] = b"DSFT";
const DATA_VERSION: u16 = 1;
const HEADER_LEN: u64 = 12;
const BLOCK_HEADER_LEN: usize = 12;
const FOOTER_LEN: u64 = 32;

/// A (byte offset, record index) pair marking the start of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Offset of the block header in the data file
    pub byte_offset: u64,
    /// Index of the first record in the block
    pub first_record: u64,
}

/// Streams encoded records into a data file
pub struct DataWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    position: u64,
    interval: usize,
    level: i32,
    pending: Vec<u8>,
    pending_count: usize,
    record_count: u64,
    checkpoints: Vec<Checkpoint>,
}

impl DataWriter {
    /// Creates (truncating) a data file at `path`
    pub fn create(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let file = File::create(path).map_err(|e| {
            StoreError::io_error(format!("Failed to create data file: {}", path.display()), e)
        })?;
        let interval = config.checkpoint_interval.max(1);
        let mut writer = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            position: 0,
            interval,
            level: config.compression_level,
            pending: Vec::new(),
            pending_count: 0,
            record_count: 0,
            checkpoints: Vec::new(),
        };

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(DATA_MAGIC);
        header.extend_from_slice(&DATA_VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&(interval as u32).to_le_bytes());
        writer.write_raw(&header)?;
        Ok(writer)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.writer.write_all(bytes).map_err(|e| {
            StoreError::io_error(format!("Failed to write data file: {}", self.path.display()), e)
        })?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Appends one encoded record, returning its record index
    pub fn append(&mut self, encoded: &[u8]) -> StoreResult<u64> {
        let len = u32::try_from(encoded.len()).map_err(|_| {
            StoreError::invalid_record(format!("Encoded record of {} bytes is too large", encoded.len()))
        })?;
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(encoded);
        self.pending_count += 1;

        let index = self.record_count;
        self.record_count += 1;
        if self.pending_count >= self.interval {
            self.flush_block()?;
        }
        Ok(index)
    }

    /// Records appended so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn flush_block(&mut self) -> StoreResult<()> {
        if self.pending_count == 0 {
            return Ok(());
        }
        let compressed = zstd::encode_all(self.pending.as_slice(), self.level).map_err(|e| {
            StoreError::io_error(format!("Failed to compress block in {}", self.path.display()), e)
        })?;
        let compressed_len = u32::try_from(compressed.len())
            .map_err(|_| StoreError::invalid_record("Compressed block exceeds u32 length"))?;

        self.checkpoints.push(Checkpoint {
            byte_offset: self.position,
            first_record: self.record_count - self.pending_count as u64,
        });

        let mut header = [0u8; BLOCK_HEADER_LEN];
        header[0..4].copy_from_slice(&compressed_len.to_le_bytes());
        header[4..8].copy_from_slice(&(self.pending_count as u32).to_le_bytes());
        header[8..12].copy_from_slice(&compute_checksum(&compressed).to_le_bytes());
        self.write_raw(&header)?;
        self.write_raw(&compressed)?;

        let records = self.pending_count.to_string();
        let compressed_bytes = compressed.len().to_string();
        Logger::trace(
            "STORE_BLOCK_WRITTEN",
            &[
                ("records", records.as_str()),
                ("compressed_bytes", compressed_bytes.as_str()),
            ],
        );

        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }

    /// Flushes the last block, writes the checkpoint table and footer
    ///
    /// Returns the number of records written.
    pub fn finish(mut self, fsync: bool) -> StoreResult<u64> {
        self.flush_block()?;

        let table_offset = self.position;
        let mut table = Vec::with_capacity(self.checkpoints.len() * 16);
        for checkpoint in &self.checkpoints {
            table.extend_from_slice(&checkpoint.byte_offset.to_le_bytes());
            table.extend_from_slice(&checkpoint.first_record.to_le_bytes());
        }
        let table_crc = compute_checksum(&table);
        self.write_raw(&table)?;

        let mut footer = Vec::with_capacity(FOOTER_LEN as usize);
        footer.extend_from_slice(&table_offset.to_le_bytes());
        footer.extend_from_slice(&(self.checkpoints.len() as u64).to_le_bytes());
        footer.extend_from_slice(&self.record_count.to_le_bytes());
        footer.extend_from_slice(&table_crc.to_le_bytes());
        footer.extend_from_slice(FOOTER_MAGIC);
        self.write_raw(&footer)?;

        let path = self.path;
        let file = self.writer.into_inner().map_err(|e| {
            StoreError::io_error(format!("Failed to flush data file: {}", path.display()), e.into_error())
        })?;
        if fsync {
            files::sync_file(&file, &path)?;
        }
        Ok(self.record_count)
    }
}

/// Random-access reader over a finished data file
#[derive(Debug)]
pub struct DataReader {
    path: PathBuf,
    file: File,
    checkpoints: Vec<Checkpoint>,
    record_count: u64,
    table_offset: u64,
}

impl DataReader {
    /// Opens a data file, validating header, footer and checkpoint table
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            StoreError::io_error(format!("Failed to open data file: {}", path.display()), e)
        })?;
        let len = file
            .metadata()
            .map_err(|e| StoreError::io_error("Failed to read data file metadata", e))?
            .len();
        if len < HEADER_LEN + FOOTER_LEN {
            return Err(StoreError::corruption_at_offset(len, "Data file too short"));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)
            .map_err(|e| StoreError::io_error("Failed to read data header", e))?;
        if &header[0..4] != DATA_MAGIC {
            return Err(StoreError::corruption_at_offset(0, "Invalid data file magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != DATA_VERSION {
            return Err(StoreError::data_corruption(format!(
                "Unsupported data file version {}",
                version
            )));
        }

        let mut footer = [0u8; FOOTER_LEN as usize];
        file.seek(SeekFrom::Start(len - FOOTER_LEN))
            .and_then(|_| file.read_exact(&mut footer))
            .map_err(|e| StoreError::io_error("Failed to read data footer", e))?;
        if &footer[28..32] != FOOTER_MAGIC {
            return Err(StoreError::corruption_at_offset(
                len - FOOTER_LEN,
                "Invalid data footer magic",
            ));
        }
        let table_offset = read_u64(&footer[0..8]);
        let checkpoint_count = read_u64(&footer[8..16]);
        let record_count = read_u64(&footer[16..24]);
        let table_crc = read_u32(&footer[24..28]);

        let table_len = checkpoint_count.saturating_mul(16);
        if table_offset < HEADER_LEN || table_offset.saturating_add(table_len) != len - FOOTER_LEN {
            return Err(StoreError::corruption_at_offset(
                len - FOOTER_LEN,
                "Checkpoint table bounds do not match file length",
            ));
        }
        let mut table = vec![0u8; table_len as usize];
        file.seek(SeekFrom::Start(table_offset))
            .and_then(|_| file.read_exact(&mut table))
            .map_err(|e| StoreError::io_error("Failed to read checkpoint table", e))?;
        if compute_checksum(&table) != table_crc {
            return Err(StoreError::corruption_at_offset(
                table_offset,
                "Checkpoint table checksum mismatch",
            ));
        }
        let checkpoints = table
            .chunks_exact(16)
            .map(|chunk| Checkpoint {
                byte_offset: read_u64(&chunk[0..8]),
                first_record: read_u64(&chunk[8..16]),
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            checkpoints,
            record_count,
            table_offset,
        })
    }

    /// Total records in the file
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// All checkpoints, in file order
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Block holding record `index`
    pub fn block_for(&self, index: u64) -> Option<usize> {
        if index >= self.record_count {
            return None;
        }
        let after = self.checkpoints.partition_point(|c| c.first_record <= index);
        after.checked_sub(1)
    }

    /// Decompresses block `block`, returning its encoded records
    pub fn read_block(&mut self, block: usize) -> StoreResult<Vec<Vec<u8>>> {
        let checkpoint = *self.checkpoints.get(block).ok_or_else(|| {
            StoreError::data_corruption(format!("Block {} out of range", block))
        })?;
        let offset = checkpoint.byte_offset;

        let mut header = [0u8; BLOCK_HEADER_LEN];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut header))
            .map_err(|_| self.corrupt(offset, "Truncated block header"))?;
        let compressed_len = read_u32(&header[0..4]) as u64;
        let count = read_u32(&header[4..8]) as usize;
        let expected_crc = read_u32(&header[8..12]);
        if offset + BLOCK_HEADER_LEN as u64 + compressed_len > self.table_offset {
            return Err(self.corrupt(offset, "Block extends past checkpoint table"));
        }

        let mut compressed = vec![0u8; compressed_len as usize];
        self.file
            .read_exact(&mut compressed)
            .map_err(|_| self.corrupt(offset, "Truncated block"))?;
        if compute_checksum(&compressed) != expected_crc {
            return Err(self.corrupt(offset, "Block checksum mismatch"));
        }
        let payload = zstd::decode_all(compressed.as_slice())
            .map_err(|e| self.corrupt(offset, &format!("Failed to decompress block: {}", e)))?;

        let records = split_records(&payload, count)
            .ok_or_else(|| self.corrupt(offset, "Block record framing is invalid"))?;
        let expected = self.block_len(block);
        if records.len() as u64 != expected {
            return Err(self.corrupt(offset, "Block record count disagrees with checkpoints"));
        }
        Ok(records)
    }

    fn block_len(&self, block: usize) -> u64 {
        let start = self.checkpoints[block].first_record;
        let end = self
            .checkpoints
            .get(block + 1)
            .map(|c| c.first_record)
            .unwrap_or(self.record_count);
        end.saturating_sub(start)
    }

    fn corrupt(&self, offset: u64, reason: &str) -> StoreError {
        StoreError::corruption_at_offset(offset, reason.to_string())
            .with_details(format!("file: {}, byte_offset: {}", self.path.display(), offset))
    }

    /// Encoded bytes of record `index`
    pub fn record(&mut self, index: u64) -> StoreResult<Option<Vec<u8>>> {
        let block = match self.block_for(index) {
            Some(b) => b,
            None => return Ok(None),
        };
        let skip = (index - self.checkpoints[block].first_record) as usize;
        Ok(self.read_block(block)?.into_iter().nth(skip))
    }

    /// Reads every block, checking checksums and framing
    pub fn verify(&mut self) -> StoreResult<u64> {
        let mut total = 0u64;
        for block in 0..self.checkpoints.len() {
            total += self.read_block(block)?.len() as u64;
        }
        if total != self.record_count {
            return Err(StoreError::data_corruption(format!(
                "Footer records {} records, blocks hold {}",
                self.record_count, total
            )));
        }
        Ok(total)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn split_records(payload: &[u8], count: usize) -> Option<Vec<Vec<u8>>> {
    let mut records = Vec::with_capacity(count);
    let mut pos = 0usize;
    while pos < payload.len() {
        let len = read_u32(payload.get(pos..pos + 4)?) as usize;
        pos += 4;
        records.push(payload.get(pos..pos.checked_add(len)?)?.to_vec());
        pos += len;
    }
    (records.len() == count).then_some(records)
}

/// Sequential cursor over a data file that seeks by checkpoint
pub struct BlockCursor {
    reader: DataReader,
    next_block: usize,
    buffered: VecDeque<Vec<u8>>,
    position: u64,
}

impl BlockCursor {
    pub fn new(reader: DataReader) -> Self {
        Self {
            reader,
            next_block: 0,
            buffered: VecDeque::new(),
            position: 0,
        }
    }

    /// Index of the record the next call to `next_encoded` returns
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total records in the file
    pub fn len(&self) -> u64 {
        self.reader.record_count()
    }

    /// Whether the file holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next encoded record, decompressing the following block when needed
    pub fn next_encoded(&mut self) -> StoreResult<Option<Vec<u8>>> {
        if self.buffered.is_empty() {
            if self.next_block >= self.reader.checkpoints().len() {
                return Ok(None);
            }
            self.buffered = self.reader.read_block(self.next_block)?.into();
            self.next_block += 1;
        }
        match self.buffered.pop_front() {
            Some(record) => {
                self.position += 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Positions the cursor at record `index`
    ///
    /// Jumps to the nearest checkpoint at or before `index` and skips
    /// forward within that block. Seeking past the end exhausts the cursor.
    pub fn seek(&mut self, index: u64) -> StoreResult<()> {
        match self.reader.block_for(index) {
            Some(block) => {
                let mut records: VecDeque<Vec<u8>> = self.reader.read_block(block)?.into();
                let skip = (index - self.reader.checkpoints()[block].first_record) as usize;
                records.drain(..skip.min(records.len()));
                self.buffered = records;
                self.next_block = block + 1;
                self.position = index;
            }
            None => {
                self.buffered.clear();
                self.next_block = self.reader.checkpoints().len();
                self.position = self.reader.record_count();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, interval: usize, records: &[&[u8]]) -> PathBuf {
        let path = dir.path().join("docs.data");
        let mut writer = DataWriter::create(&path, &StoreConfig::with_checkpoint_interval(interval)).unwrap();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(writer.append(record).unwrap(), i as u64);
        }
        assert_eq!(writer.finish(false).unwrap(), records.len() as u64);
        path
    }

    fn numbered(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("record-{}", i).into_bytes()).collect()
    }

    #[test]
    fn test_checkpoints_every_interval() {
        let dir = TempDir::new().unwrap();
        let records = numbered(10);
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let path = write_file(&dir, 4, &refs);

        let reader = DataReader::open(&path).unwrap();
        assert_eq!(reader.record_count(), 10);
        let firsts: Vec<u64> = reader.checkpoints().iter().map(|c| c.first_record).collect();
        assert_eq!(firsts, vec![0, 4, 8]);
        assert_eq!(reader.block_for(0), Some(0));
        assert_eq!(reader.block_for(7), Some(1));
        assert_eq!(reader.block_for(9), Some(2));
        assert_eq!(reader.block_for(10), None);
    }

    #[test]
    fn test_random_record_access() {
        let dir = TempDir::new().unwrap();
        let records = numbered(25);
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let path = write_file(&dir, 8, &refs);

        let mut reader = DataReader::open(&path).unwrap();
        for i in [0u64, 7, 8, 13, 24] {
            assert_eq!(reader.record(i).unwrap().unwrap(), records[i as usize]);
        }
        assert_eq!(reader.record(25).unwrap(), None);
        assert_eq!(reader.verify().unwrap(), 25);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, 4, &[]);
        let reader = DataReader::open(&path).unwrap();
        assert_eq!(reader.record_count(), 0);
        assert!(reader.checkpoints().is_empty());

        let mut cursor = BlockCursor::new(reader);
        assert!(cursor.is_empty());
        assert_eq!(cursor.next_encoded().unwrap(), None);
    }

    #[test]
    fn test_cursor_seek_and_iterate() {
        let dir = TempDir::new().unwrap();
        let records = numbered(11);
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let path = write_file(&dir, 3, &refs);

        let mut cursor = BlockCursor::new(DataReader::open(&path).unwrap());
        cursor.seek(5).unwrap();
        assert_eq!(cursor.position(), 5);
        let mut rest = Vec::new();
        while let Some(record) = cursor.next_encoded().unwrap() {
            rest.push(record);
        }
        assert_eq!(rest, records[5..].to_vec());

        cursor.seek(1).unwrap();
        assert_eq!(cursor.next_encoded().unwrap().unwrap(), records[1]);

        cursor.seek(100).unwrap();
        assert_eq!(cursor.next_encoded().unwrap(), None);
    }

    #[test]
    fn test_block_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let records = numbered(6);
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let path = write_file(&dir, 3, &refs);

        let mut bytes = fs::read(&path).unwrap();
        let first_block_payload = HEADER_LEN as usize + BLOCK_HEADER_LEN + 2;
        bytes[first_block_payload] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let mut reader = DataReader::open(&path).unwrap();
        let err = reader.record(0).unwrap_err();
        assert!(err.is_fatal());
        assert!(reader.verify().is_err());
        assert_eq!(reader.record(4).unwrap().unwrap(), records[4]);
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().unwrap();
        let records = numbered(6);
        let refs: Vec<&[u8]> = records.iter().map(|r| r.as_slice()).collect();
        let path = write_file(&dir, 3, &refs);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(DataReader::open(&path).unwrap_err().is_fatal());
    }
}
