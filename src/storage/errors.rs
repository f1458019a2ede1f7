//! Store error types
//!
//! Error codes:
//! - DOCSTORE_NOT_FOUND (ERROR severity)
//! - DOCSTORE_INCOMPLETE_BUILD (ERROR severity)
//! - DOCSTORE_SCHEMA_MISMATCH (ERROR severity)
//! - DOCSTORE_IO_ERROR (ERROR severity)
//! - DOCSTORE_DUPLICATE_KEY (ERROR severity)
//! - DOCSTORE_INVALID_RECORD (ERROR severity)
//! - DOCSTORE_INVALID_SCHEMA (ERROR severity)
//! - DOCSTORE_SOURCE_FAILED (ERROR severity)
//! - DOCSTORE_DATA_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

/// Severity levels for store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, caller may retry or recover
    Error,
    /// On-disk state cannot be trusted; the store must be rebuilt
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Store error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// A single-key lookup missed
    NotFound,
    /// The operation needs a finalized store and none exists
    IncompleteBuild,
    /// The finalized store was written for a different schema or index layout
    SchemaMismatch,
    /// Disk I/O failure
    IoError,
    /// Two records share a value of a unique index field
    DuplicateKey,
    /// A record does not conform to the schema
    InvalidRecord,
    /// The schema or index configuration itself is unusable
    InvalidSchema,
    /// The record source reported a failure
    SourceFailed,
    /// Checksum or structural failure in persisted data
    DataCorruption,
}

impl StoreErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::NotFound => "DOCSTORE_NOT_FOUND",
            StoreErrorCode::IncompleteBuild => "DOCSTORE_INCOMPLETE_BUILD",
            StoreErrorCode::SchemaMismatch => "DOCSTORE_SCHEMA_MISMATCH",
            StoreErrorCode::IoError => "DOCSTORE_IO_ERROR",
            StoreErrorCode::DuplicateKey => "DOCSTORE_DUPLICATE_KEY",
            StoreErrorCode::InvalidRecord => "DOCSTORE_INVALID_RECORD",
            StoreErrorCode::InvalidSchema => "DOCSTORE_INVALID_SCHEMA",
            StoreErrorCode::SourceFailed => "DOCSTORE_SOURCE_FAILED",
            StoreErrorCode::DataCorruption => "DOCSTORE_DATA_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StoreErrorCode::DataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Store error with code, message and optional context
#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StoreError {
    fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// A single-key lookup found nothing
    pub fn not_found(key: impl fmt::Display) -> Self {
        Self::new(StoreErrorCode::NotFound, "Key not found").with_details(format!("key: {}", key))
    }

    /// The store has no finalized build
    pub fn incomplete_build(path: impl fmt::Display) -> Self {
        Self::new(StoreErrorCode::IncompleteBuild, "Store has not been built")
            .with_details(format!("path: {}", path))
    }

    /// The finalized store disagrees with the expected schema or index layout
    pub fn schema_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            StoreErrorCode::SchemaMismatch,
            "Store was built for a different schema; clear and rebuild it",
        )
        .with_details(format!("expected: {}, found: {}", expected, found))
    }

    /// Disk I/O failure
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(StoreErrorCode::IoError, message)
        }
    }

    /// Duplicate value in a unique index field
    pub fn duplicate_key(field: &str, key: impl fmt::Display) -> Self {
        Self::new(StoreErrorCode::DuplicateKey, "Duplicate value in unique index field")
            .with_details(format!("field: {}, key: {}", field, key))
    }

    /// Record does not conform to the schema
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidRecord, message)
    }

    /// Unusable schema or index configuration
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::InvalidSchema, message)
    }

    /// The record source failed
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::SourceFailed, message)
    }

    /// Data corruption (FATAL)
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::DataCorruption, message)
    }

    /// Data corruption at a byte offset (FATAL)
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::DataCorruption, reason)
            .with_details(format!("byte_offset: {}", offset))
    }

    /// Attaches context to the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> StoreErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether persisted data can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns whether this is a single-key lookup miss
    pub fn is_not_found(&self) -> bool {
        self.code == StoreErrorCode::NotFound
    }

    /// Returns whether the on-disk store is stale for the current schema
    pub fn is_schema_mismatch(&self) -> bool {
        self.code == StoreErrorCode::SchemaMismatch
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(StoreErrorCode::NotFound.code(), "DOCSTORE_NOT_FOUND");
        assert_eq!(StoreErrorCode::IncompleteBuild.code(), "DOCSTORE_INCOMPLETE_BUILD");
        assert_eq!(StoreErrorCode::SchemaMismatch.code(), "DOCSTORE_SCHEMA_MISMATCH");
        assert_eq!(StoreErrorCode::DataCorruption.code(), "DOCSTORE_DATA_CORRUPTION");
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(StoreError::data_corruption("bad crc").is_fatal());
        assert!(!StoreError::not_found("doc1").is_fatal());
        assert!(!StoreError::io_error("disk full", io::Error::new(io::ErrorKind::Other, "full")).is_fatal());
    }

    #[test]
    fn test_predicates() {
        assert!(StoreError::not_found("x").is_not_found());
        assert!(StoreError::schema_mismatch("a", "b").is_schema_mismatch());
        assert!(!StoreError::invalid_record("x").is_not_found());
    }

    #[test]
    fn test_display_contains_context() {
        let err = StoreError::corruption_at_offset(1024, "checksum mismatch");
        let display = err.to_string();
        assert!(display.contains("DOCSTORE_DATA_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("checksum mismatch"));
        assert!(display.contains("byte_offset: 1024"));
    }

    #[test]
    fn test_not_found_names_key() {
        let err = StoreError::not_found("doc-42");
        assert!(err.details().unwrap().contains("doc-42"));
    }
}
