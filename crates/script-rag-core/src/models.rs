//! Core data models that flow through the chunk → embed → index pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifier of an indexed chunk.
///
/// Ids are allocated from a persisted counter, so they increase
/// monotonically and are never reused, even after the chunk is removed.
/// Ascending id order within a document follows source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub fn value(self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> ChunkId {
        ChunkId(self.0 + 1)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source document registered with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// Caller-facing name; `remove_document` resolves by this.
    pub name: String,
    pub raw_text: String,
    pub added_at: DateTime<Utc>,
    /// SHA-256 of `raw_text`, hex encoded.
    pub content_hash: String,
    /// Path the text was extracted from, when added through the CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl Document {
    pub fn new(name: &str, raw_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            raw_text: raw_text.to_string(),
            added_at: Utc::now(),
            content_hash: content_hash(raw_text),
            source_path: None,
        }
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

/// The metadata half of a chunk. Its embedding lives in the vector index
/// under the same [`ChunkId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub document_id: Uuid,
    pub document_name: String,
    /// Character offset of the first character (inclusive).
    pub start_offset: usize,
    /// Character offset one past the last character (exclusive).
    pub end_offset: usize,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A ranked retrieval result: an index hit joined with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// 1-based position in the ranking.
    pub rank: usize,
    pub chunk_id: ChunkId,
    pub document_name: String,
    pub chunk_text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub score: f32,
}

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
