//! Error taxonomy shared by every retrieval component.
//!
//! Each variant maps to a stable kind name (see [`RagError::kind`]) that the
//! command surface prints before the human-readable cause.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ChunkId;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    InvalidChunkConfig { chunk_size: usize, overlap: usize },

    #[error("document '{0}' produced no chunks")]
    EmptyDocument(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk {0} is already indexed")]
    DuplicateChunk(ChunkId),

    #[error("snapshot {field} is '{stored}' but the configured value is '{configured}'")]
    ConfigMismatch {
        field: &'static str,
        stored: String,
        configured: String,
    },

    #[error("unsupported snapshot schema version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("I/O failure at {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "index and metadata disagree: {index_only} chunk(s) only in the index, \
         {metadata_only} only in metadata; run `rebuild` to regenerate the index"
    )]
    IndexInconsistency {
        index_only: usize,
        metadata_only: usize,
    },

    #[error("corrupt snapshot artifact {path}: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("operation cancelled before any change was written")]
    Cancelled,

    #[error("store at {0} is locked by another writer")]
    StoreLocked(PathBuf),

    #[error("store was opened read-only")]
    ReadOnly,
}

impl RagError {
    /// Stable name of the error kind, used by the command surface.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::InvalidChunkConfig { .. } => "InvalidChunkConfig",
            RagError::EmptyDocument(_) => "EmptyDocument",
            RagError::DimensionMismatch { .. } => "DimensionMismatch",
            RagError::DuplicateChunk(_) => "DuplicateChunk",
            RagError::ConfigMismatch { .. } => "ConfigMismatch",
            RagError::UnsupportedVersion { .. } => "UnsupportedVersion",
            RagError::IoFailure { .. } => "IOFailure",
            RagError::IndexInconsistency { .. } => "IndexInconsistency",
            RagError::CorruptSnapshot { .. } => "CorruptSnapshot",
            RagError::Serialization(_) => "Serialization",
            RagError::Embedding(_) => "Embedding",
            RagError::Extraction(_) => "Extraction",
            RagError::Cancelled => "Cancelled",
            RagError::StoreLocked(_) => "StoreLocked",
            RagError::ReadOnly => "ReadOnly",
        }
    }

    /// Wrap an `std::io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RagError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

pub type RagResult<T> = Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err = RagError::InvalidChunkConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert_eq!(err.kind(), "InvalidChunkConfig");
        assert_eq!(
            RagError::io("/tmp/x", std::io::Error::other("boom")).kind(),
            "IOFailure"
        );
        assert_eq!(RagError::Cancelled.kind(), "Cancelled");
    }

    #[test]
    fn test_display_mentions_values() {
        let err = RagError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains('3'));
    }
}
