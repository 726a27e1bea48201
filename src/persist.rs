//! Snapshot persistence for the vector index and chunk metadata.
//!
//! A snapshot is three artifacts written together into a generation
//! directory under the storage root:
//!
//! ```text
//! <root>/
//!   CURRENT          # name of the live generation
//!   LOCK             # present while a writer holds the store
//!   gen-000042/
//!     index.bin      # vectors
//!     metadata.json  # documents + chunk records
//!     config.toml    # SnapshotConfig
//! ```
//!
//! # Atomicity
//!
//! [`PersistenceManager::save`] never touches the live generation. It writes
//! and fsyncs a fresh `gen-N+1/`, then replaces `CURRENT` through a temp
//! file and rename. Readers follow `CURRENT`, so a crash at any step leaves
//! either the old or the new generation fully visible. Once the rename has
//! happened the save has committed. Generations older than the previous one
//! are pruned after the switch; the previous one stays for readers that
//! resolved `CURRENT` just before it moved.
//!
//! # Load checks
//!
//! In order: schema version, embedding model / dimension / metric against
//! the running configuration, artifact checksums, then the chunk-id sets of
//! index and metadata. Nothing is repaired automatically; an inconsistent
//! store must be fixed with `rebuild`.
//!
//! # `index.bin` format
//!
//! ```text
//! magic  "SRAGIDX1"       8 bytes
//! dim    u32 LE
//! count  u64 LE
//! count × { id u64 LE, dim × f32 LE }
//! ```

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use script_rag_core::embedding::{blob_to_vec, vec_to_blob};
use script_rag_core::error::{RagError, RagResult};
use script_rag_core::index::{new_index, Metric, VectorIndex};
use script_rag_core::metadata::MetadataStore;
use script_rag_core::models::{ChunkId, ChunkRecord, Document};

/// Snapshot schema this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const LOCK_FILE: &str = "LOCK";
const INDEX_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";
const CONFIG_FILE: &str = "config.toml";
const GENERATION_PREFIX: &str = "gen-";
const INDEX_MAGIC: &[u8; 8] = b"SRAGIDX1";
const INDEX_HEADER_LEN: usize = 8 + 4 + 8;

/// Persisted alongside every snapshot and validated on every load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub schema_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: Metric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Next id to hand out; ids are never reused.
    pub next_chunk_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub index_sha256: String,
    pub metadata_sha256: String,
}

/// What the running process requires of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedConfig {
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: Metric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Borrowed state handed to [`PersistenceManager::save`].
pub struct SnapshotParts<'a> {
    pub index: &'a dyn VectorIndex,
    pub metadata: &'a MetadataStore,
    pub next_chunk_id: ChunkId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct LoadedSnapshot {
    pub config: SnapshotConfig,
    pub index: Box<dyn VectorIndex>,
    pub metadata: MetadataStore,
}

#[derive(Debug)]
pub struct LoadedMetadata {
    pub config: SnapshotConfig,
    pub metadata: MetadataStore,
}

#[derive(Serialize)]
struct MetadataArtifactRef<'a> {
    documents: Vec<&'a Document>,
    chunks: Vec<&'a ChunkRecord>,
}

#[derive(Deserialize)]
struct MetadataArtifact {
    documents: Vec<Document>,
    chunks: Vec<ChunkRecord>,
}

/// Reads and writes snapshots under one storage root.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    root: PathBuf,
}

impl PersistenceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a new generation and make it current.
    pub fn save(
        &self,
        expected: &ExpectedConfig,
        parts: SnapshotParts<'_>,
    ) -> RagResult<SnapshotConfig> {
        fs::create_dir_all(&self.root).map_err(|e| RagError::io(&self.root, e))?;

        let generation = self.generations()?.last().copied().unwrap_or(0) + 1;
        let name = generation_name(generation);
        let dir = self.root.join(&name);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| RagError::io(&dir, e))?;
        }
        fs::create_dir(&dir).map_err(|e| RagError::io(&dir, e))?;

        let index_bytes = encode_index(parts.index);
        let metadata_bytes = serde_json::to_vec_pretty(&MetadataArtifactRef {
            documents: parts.metadata.documents().collect(),
            chunks: parts.metadata.records().collect(),
        })
        .map_err(|e| RagError::Serialization(e.to_string()))?;

        let config = SnapshotConfig {
            schema_version: SCHEMA_VERSION,
            embedding_model: expected.embedding_model.clone(),
            dimension: expected.dimension,
            metric: expected.metric,
            chunk_size: expected.chunk_size,
            chunk_overlap: expected.chunk_overlap,
            next_chunk_id: parts.next_chunk_id.value(),
            created_at: parts.created_at,
            updated_at: Utc::now(),
            index_sha256: sha256_hex(&index_bytes),
            metadata_sha256: sha256_hex(&metadata_bytes),
        };
        let config_text =
            toml::to_string_pretty(&config).map_err(|e| RagError::Serialization(e.to_string()))?;

        write_synced(&dir.join(INDEX_FILE), &index_bytes)?;
        write_synced(&dir.join(METADATA_FILE), &metadata_bytes)?;
        write_synced(&dir.join(CONFIG_FILE), config_text.as_bytes())?;
        sync_dir(&dir)?;

        self.write_current(&name)?;
        self.prune(generation);

        tracing::info!(
            generation = %name,
            chunks = parts.metadata.len(),
            documents = parts.metadata.document_count(),
            "snapshot saved"
        );
        Ok(config)
    }

    /// Load the current snapshot. `Ok(None)` when the store is fresh.
    pub fn load(&self, expected: &ExpectedConfig) -> RagResult<Option<LoadedSnapshot>> {
        let Some(dir) = self.current_dir()? else {
            return Ok(None);
        };
        let config = read_config(&dir)?;
        check_compatible(&config, expected)?;
        let metadata = read_metadata(&dir, &config)?;

        let index_path = dir.join(INDEX_FILE);
        let index_bytes = read_file(&index_path)?;
        verify_checksum(&index_path, &index_bytes, &config.index_sha256)?;
        let index = decode_index(&index_path, &index_bytes, config.dimension, config.metric)?;

        check_consistency(index.as_ref(), &metadata)?;

        tracing::debug!(
            path = %dir.display(),
            chunks = metadata.len(),
            "snapshot loaded"
        );
        Ok(Some(LoadedSnapshot {
            config,
            index,
            metadata,
        }))
    }

    /// Load config and metadata only, ignoring the index artifact.
    pub fn load_metadata_only(&self, expected: &ExpectedConfig) -> RagResult<Option<LoadedMetadata>> {
        let Some(dir) = self.current_dir()? else {
            return Ok(None);
        };
        let config = read_config(&dir)?;
        check_compatible(&config, expected)?;
        let metadata = read_metadata(&dir, &config)?;
        Ok(Some(LoadedMetadata { config, metadata }))
    }

    /// Delete every generation except the current one.
    ///
    /// Used after a destructive commit such as clearing the store, so the
    /// superseded data does not linger on disk until the next save.
    pub fn discard_superseded(&self) -> RagResult<()> {
        let pointer = self.root.join(CURRENT_FILE);
        let Some(dir) = self.current_dir()? else {
            return Ok(());
        };
        let current = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_generation)
            .ok_or_else(|| RagError::CorruptSnapshot {
                path: pointer,
                reason: "unreadable generation name".to_string(),
            })?;
        for generation in self.generations()?.into_iter().filter(|g| *g < current) {
            let dir = self.root.join(generation_name(generation));
            fs::remove_dir_all(&dir).map_err(|e| RagError::io(&dir, e))?;
        }
        tracing::debug!(root = %self.root.display(), "superseded snapshots discarded");
        Ok(())
    }

    fn current_dir(&self) -> RagResult<Option<PathBuf>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RagError::io(&pointer, e)),
        };
        let name = name.trim();
        if parse_generation(name).is_none() {
            return Err(RagError::CorruptSnapshot {
                path: pointer,
                reason: format!("'{}' is not a generation name", name),
            });
        }
        Ok(Some(self.root.join(name)))
    }

    fn write_current(&self, name: &str) -> RagResult<()> {
        let pointer = self.root.join(CURRENT_FILE);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| RagError::io(&self.root, e))?;
        tmp.write_all(name.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| RagError::io(tmp.path(), e))?;
        tmp.persist(&pointer)
            .map_err(|e| RagError::io(&pointer, e.error))?;
        // The rename is the commit point; the new generation is live from here.
        if let Err(e) = sync_dir(&self.root) {
            tracing::warn!(root = %self.root.display(), error = %e, "failed to sync CURRENT pointer");
        }
        Ok(())
    }

    /// Generation numbers present on disk, ascending.
    fn generations(&self) -> RagResult<Vec<u64>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RagError::io(&self.root, e)),
        };
        let mut generations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RagError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(g) = entry.file_name().to_str().and_then(parse_generation) {
                generations.push(g);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    /// Remove generations older than the one before `current`. The previous
    /// generation survives so a lock-free reader that resolved `CURRENT`
    /// just before the switch can finish loading it. Failures only leave
    /// garbage.
    fn prune(&self, current: u64) {
        let Ok(generations) = self.generations() else {
            return;
        };
        let oldest_kept = current.saturating_sub(1);
        for generation in generations.into_iter().filter(|g| *g < oldest_kept) {
            let dir = self.root.join(generation_name(generation));
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "failed to prune old snapshot");
            }
        }
    }
}

/// Exclusive writer lock on a storage root, released on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// # Errors
    ///
    /// `StoreLocked` if another writer holds the lock. A lock left behind
    /// by a crashed process must be deleted by hand.
    pub fn acquire(root: &Path) -> RagResult<Self> {
        fs::create_dir_all(root).map_err(|e| RagError::io(root, e))?;
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RagError::StoreLocked(root.to_path_buf()));
            }
            Err(e) => return Err(RagError::io(&path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| RagError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "writer lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release writer lock");
        }
    }
}

// ============ Artifacts ============

/// Encode every vector in ascending id order.
pub fn encode_index(index: &dyn VectorIndex) -> Vec<u8> {
    let ids = index.ids();
    let dim = index.dimension();
    let mut out = Vec::with_capacity(INDEX_HEADER_LEN + ids.len() * (8 + dim * 4));
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.value().to_le_bytes());
        if let Some(vector) = index.get(id) {
            out.extend_from_slice(&vec_to_blob(vector));
        }
    }
    out
}

pub fn decode_index(
    path: &Path,
    bytes: &[u8],
    dimension: usize,
    metric: Metric,
) -> RagResult<Box<dyn VectorIndex>> {
    let corrupt = |reason: String| RagError::CorruptSnapshot {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < INDEX_HEADER_LEN || &bytes[..8] != INDEX_MAGIC {
        return Err(corrupt("missing SRAGIDX1 header".to_string()));
    }
    let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if dim != dimension {
        return Err(corrupt(format!(
            "index dimension {} does not match snapshot config {}",
            dim, dimension
        )));
    }
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let entry_len = 8 + dim * 4;
    let expected_len = count
        .checked_mul(entry_len)
        .and_then(|n| n.checked_add(INDEX_HEADER_LEN));
    if expected_len != Some(bytes.len()) {
        return Err(corrupt(format!(
            "{} bytes for {} entries of dimension {}",
            bytes.len(),
            count,
            dim
        )));
    }

    let mut index = new_index(dim, metric);
    for entry in bytes[INDEX_HEADER_LEN..].chunks_exact(entry_len) {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&entry[..8]);
        let id = ChunkId(u64::from_le_bytes(id_bytes));
        let vector = blob_to_vec(&entry[8..]);
        index
            .add(id, vector)
            .map_err(|e| corrupt(e.to_string()))?;
    }
    Ok(index)
}

fn read_config(dir: &Path) -> RagResult<SnapshotConfig> {
    let path = dir.join(CONFIG_FILE);
    let text = fs::read_to_string(&path).map_err(|e| RagError::io(&path, e))?;
    let corrupt = |reason: String| RagError::CorruptSnapshot {
        path: path.clone(),
        reason,
    };

    // Version first, so a future layout is reported as such rather than as
    // a parse failure.
    let raw: toml::Value = toml::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
    let version = raw
        .get("schema_version")
        .and_then(|v| v.as_integer())
        .ok_or_else(|| corrupt("missing schema_version".to_string()))?;
    if version != i64::from(SCHEMA_VERSION) {
        return Err(RagError::UnsupportedVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: SCHEMA_VERSION,
        });
    }

    toml::from_str(&text).map_err(|e| corrupt(e.to_string()))
}

fn check_compatible(stored: &SnapshotConfig, expected: &ExpectedConfig) -> RagResult<()> {
    if stored.embedding_model != expected.embedding_model {
        return Err(RagError::ConfigMismatch {
            field: "embedding_model",
            stored: stored.embedding_model.clone(),
            configured: expected.embedding_model.clone(),
        });
    }
    if stored.dimension != expected.dimension {
        return Err(RagError::ConfigMismatch {
            field: "dimension",
            stored: stored.dimension.to_string(),
            configured: expected.dimension.to_string(),
        });
    }
    if stored.metric != expected.metric {
        return Err(RagError::ConfigMismatch {
            field: "metric",
            stored: stored.metric.to_string(),
            configured: expected.metric.to_string(),
        });
    }
    if stored.chunk_size != expected.chunk_size || stored.chunk_overlap != expected.chunk_overlap {
        tracing::warn!(
            stored_size = stored.chunk_size,
            stored_overlap = stored.chunk_overlap,
            size = expected.chunk_size,
            overlap = expected.chunk_overlap,
            "chunking changed since the snapshot was written; existing chunks keep their boundaries"
        );
    }
    Ok(())
}

fn read_metadata(dir: &Path, config: &SnapshotConfig) -> RagResult<MetadataStore> {
    let path = dir.join(METADATA_FILE);
    let bytes = read_file(&path)?;
    verify_checksum(&path, &bytes, &config.metadata_sha256)?;
    let artifact: MetadataArtifact =
        serde_json::from_slice(&bytes).map_err(|e| RagError::CorruptSnapshot {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    let metadata = MetadataStore::from_parts(artifact.documents, artifact.chunks);

    if let Some(max) = metadata.max_id() {
        if max.value() >= config.next_chunk_id {
            return Err(RagError::CorruptSnapshot {
                path,
                reason: format!(
                    "chunk id {} is not below next_chunk_id {}",
                    max, config.next_chunk_id
                ),
            });
        }
    }
    Ok(metadata)
}

fn check_consistency(index: &dyn VectorIndex, metadata: &MetadataStore) -> RagResult<()> {
    let in_index: BTreeSet<ChunkId> = index.ids().into_iter().collect();
    let in_metadata: BTreeSet<ChunkId> = metadata.ids().into_iter().collect();
    if in_index == in_metadata {
        return Ok(());
    }
    Err(RagError::IndexInconsistency {
        index_only: in_index.difference(&in_metadata).count(),
        metadata_only: in_metadata.difference(&in_index).count(),
    })
}

fn verify_checksum(path: &Path, bytes: &[u8], expected: &str) -> RagResult<()> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(RagError::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: format!("sha256 {} does not match recorded {}", actual, expected),
        });
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn read_file(path: &Path) -> RagResult<Vec<u8>> {
    fs::read(path).map_err(|e| RagError::io(path, e))
}

fn write_synced(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let mut file = File::create(path).map_err(|e| RagError::io(path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| RagError::io(path, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> RagResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| RagError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> RagResult<()> {
    Ok(())
}

fn generation_name(generation: u64) -> String {
    format!("{}{:06}", GENERATION_PREFIX, generation)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_rag_core::index::FlatIndex;

    fn expected() -> ExpectedConfig {
        ExpectedConfig {
            embedding_model: "feature-hash".to_string(),
            dimension: 3,
            metric: Metric::Cosine,
            chunk_size: 100,
            chunk_overlap: 20,
        }
    }

    fn sample() -> (FlatIndex, MetadataStore) {
        let doc = Document::new("ep1", "abcdefgh");
        let mut metadata = MetadataStore::new();
        let mut index = FlatIndex::new(3, Metric::Cosine);
        for (i, v) in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].iter().enumerate() {
            let id = ChunkId(i as u64);
            metadata.put(ChunkRecord {
                id,
                document_id: doc.id,
                document_name: doc.name.clone(),
                start_offset: i * 4,
                end_offset: i * 4 + 4,
                text: doc.raw_text[i * 4..i * 4 + 4].to_string(),
                created_at: Utc::now(),
            });
            index.add(id, v.to_vec()).unwrap();
        }
        metadata.insert_document(doc);
        (index, metadata)
    }

    fn save(manager: &PersistenceManager, index: &dyn VectorIndex, metadata: &MetadataStore) {
        manager
            .save(
                &expected(),
                SnapshotParts {
                    index,
                    metadata,
                    next_chunk_id: ChunkId(2),
                    created_at: Utc::now(),
                },
            )
            .unwrap();
    }

    fn current_generation_dir(root: &Path) -> PathBuf {
        let name = fs::read_to_string(root.join(CURRENT_FILE)).unwrap();
        root.join(name.trim())
    }

    #[test]
    fn test_fresh_store_loads_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path().join("db"));
        assert!(manager.load(&expected()).unwrap().is_none());
        assert!(!dir.path().join("db").join(CURRENT_FILE).exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);

        let loaded = manager.load(&expected()).unwrap().unwrap();
        assert_eq!(loaded.config.next_chunk_id, 2);
        assert_eq!(loaded.config.schema_version, SCHEMA_VERSION);
        assert_eq!(loaded.index.ids(), vec![ChunkId(0), ChunkId(1)]);
        assert_eq!(loaded.index.get(ChunkId(1)).unwrap(), &[0.0f32, 1.0, 0.0][..]);
        assert_eq!(loaded.metadata.len(), 2);
        assert_eq!(loaded.metadata.document_count(), 1);
    }

    #[test]
    fn test_save_prunes_old_generations() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);
        save(&manager, &index, &metadata);
        save(&manager, &index, &metadata);
        assert_eq!(manager.generations().unwrap(), vec![2, 3]);
        assert!(current_generation_dir(dir.path()).ends_with("gen-000003"));
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);

        let other = ExpectedConfig {
            embedding_model: "all-minilm-l6-v2".to_string(),
            ..expected()
        };
        let err = manager.load(&other).unwrap_err();
        assert!(matches!(
            err,
            RagError::ConfigMismatch {
                field: "embedding_model",
                ..
            }
        ));

        let other = ExpectedConfig {
            dimension: 4,
            ..expected()
        };
        assert_eq!(manager.load(&other).unwrap_err().kind(), "ConfigMismatch");
    }

    #[test]
    fn test_unknown_schema_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);

        let config_path = current_generation_dir(dir.path()).join(CONFIG_FILE);
        let text = fs::read_to_string(&config_path).unwrap();
        fs::write(
            &config_path,
            text.replace("schema_version = 1", "schema_version = 99"),
        )
        .unwrap();

        let err = manager.load(&expected()).unwrap_err();
        assert!(matches!(
            err,
            RagError::UnsupportedVersion {
                found: 99,
                supported: SCHEMA_VERSION
            }
        ));
    }

    #[test]
    fn test_tampered_index_is_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);

        let index_path = current_generation_dir(dir.path()).join(INDEX_FILE);
        let mut bytes = fs::read(&index_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&index_path, bytes).unwrap();

        assert_eq!(manager.load(&expected()).unwrap_err().kind(), "CorruptSnapshot");
        // Metadata is still readable for a rebuild.
        assert!(manager.load_metadata_only(&expected()).unwrap().is_some());
    }

    #[test]
    fn test_inconsistent_id_sets() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (mut index, metadata) = sample();
        index.remove(&[ChunkId(1)]);
        save(&manager, &index, &metadata);

        let err = manager.load(&expected()).unwrap_err();
        assert!(matches!(
            err,
            RagError::IndexInconsistency {
                index_only: 0,
                metadata_only: 1
            }
        ));
    }

    #[test]
    fn test_discard_superseded_keeps_current_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);
        save(&manager, &index, &metadata);
        manager.discard_superseded().unwrap();
        assert_eq!(manager.generations().unwrap(), vec![2]);
        assert!(manager.load(&expected()).unwrap().is_some());
    }

    #[test]
    fn test_discard_superseded_on_fresh_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path().join("db"));
        assert!(manager.discard_superseded().is_ok());
    }

    #[test]
    fn test_metric_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);

        let euclidean = ExpectedConfig {
            metric: Metric::Euclidean,
            ..expected()
        };
        let err = manager.load(&euclidean).unwrap_err();
        assert!(matches!(
            err,
            RagError::ConfigMismatch {
                field: "metric",
                ..
            }
        ));
        // The metadata-only path used by rebuild enforces it too.
        assert_eq!(
            manager.load_metadata_only(&euclidean).unwrap_err().kind(),
            "ConfigMismatch"
        );
    }

    #[test]
    fn test_pointer_switch_commits_generation() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        fs::create_dir(dir.path().join("gen-000007")).unwrap();
        manager.write_current("gen-000007").unwrap();
        assert_eq!(
            manager.current_dir().unwrap(),
            Some(dir.path().join("gen-000007"))
        );
    }

    #[test]
    fn test_previous_generation_survives_one_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = PersistenceManager::new(dir.path());
        let (index, metadata) = sample();
        save(&manager, &index, &metadata);
        let first = current_generation_dir(dir.path());
        save(&manager, &index, &metadata);
        assert!(first.join(INDEX_FILE).exists());
        save(&manager, &index, &metadata);
        assert!(!first.exists());
    }

    #[test]
    fn test_decode_rejects_truncated_index() {
        let (index, _) = sample();
        let bytes = encode_index(&index);
        let path = Path::new("index.bin");
        assert!(decode_index(path, &bytes[..bytes.len() - 4], 3, Metric::Cosine).is_err());
        assert!(decode_index(path, b"NOTMAGIC", 3, Metric::Cosine).is_err());
        assert!(decode_index(path, &bytes, 4, Metric::Cosine).is_err());
        assert_eq!(
            decode_index(path, &bytes, 3, Metric::Cosine).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_writer_lock_is_exclusive() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = WriterLock::acquire(dir.path()).unwrap();
        let err = WriterLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "StoreLocked");
        assert!(lock.path().exists());
        drop(lock);
        assert!(WriterLock::acquire(dir.path()).is_ok());
    }
}
