//! Store metadata marker
//!
//! `<name>.meta` is the finalized marker: it is renamed into place after
//! every other store file, so its presence means the build completed.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "schema_name": "GenericDoc",
//!   "schema_fingerprint": "9f2c...",
//!   "record_count": 1000,
//!   "lookup_field": "doc_id",
//!   "index_fields": ["lang"],
//!   "checkpoint_interval": 128,
//!   "built_at": "2026-10-16T09:30:00Z"
//! }
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{StoreError, StoreResult};
use super::files::{self, TempFiles};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Contents of the `.meta` marker file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMeta {
    /// On-disk format version
    pub format_version: u32,
    /// Name of the schema the store was built with
    pub schema_name: String,
    /// Fingerprint of the schema layout
    pub schema_fingerprint: String,
    /// Number of records in the store
    pub record_count: u64,
    /// Unique lookup field
    pub lookup_field: String,
    /// Secondary index fields, in configuration order
    pub index_fields: Vec<String>,
    /// Records per checkpoint
    pub checkpoint_interval: usize,
    /// Build completion time (RFC3339)
    pub built_at: String,
}

impl StoreMeta {
    /// Serializes the marker to JSON
    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StoreError::invalid_schema(format!("Failed to serialize store metadata: {}", e))
        })
    }

    /// Parses a marker; unreadable contents are corruption
    pub fn from_json(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            StoreError::data_corruption(format!("Failed to parse store metadata: {}", e))
        })
    }

    /// Reads the marker at `path`, `None` when it does not exist
    pub fn read(path: &Path) -> StoreResult<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io_error(
                format!("Failed to read store metadata: {}", path.display()),
                e,
            )),
        }
    }

    /// Writes the marker to a temporary file and renames it to `path`
    ///
    /// The temporary file is removed when any step fails.
    pub fn commit(&self, path: &Path, fsync: bool) -> StoreResult<()> {
        let json = self.to_json()?;
        let mut temps = TempFiles::new();
        let tmp = temps.track(files::tmp_path(path));

        let mut file = File::create(&tmp).map_err(|e| {
            StoreError::io_error(format!("Failed to create metadata file: {}", tmp.display()), e)
        })?;
        file.write_all(json.as_bytes()).map_err(|e| {
            StoreError::io_error(format!("Failed to write metadata file: {}", tmp.display()), e)
        })?;
        if fsync {
            files::sync_file(&file, &tmp)?;
        }
        drop(file);

        crate::crash_point::maybe_crash(crate::crash_point::points::BUILD_BEFORE_META_RENAME);
        files::commit_rename(&tmp, path, fsync)?;
        temps.disarm();
        Ok(())
    }
}
