//! Retrieval service: the single entry point over index, metadata and
//! snapshots.
//!
//! # Transactions
//!
//! Mutations (`add_document`, `remove_document`, `clear`, `rebuild`) hold the
//! write guard from chunking through persistence:
//!
//! 1. Chunk and embed. Nothing shared is touched; a failure or cancellation
//!    here simply returns.
//! 2. Apply to index and metadata together, allocating chunk ids from the
//!    persisted counter.
//! 3. Save a snapshot. If that fails, step 2 is undone so memory matches the
//!    last committed snapshot again.
//!
//! Queries take the read guard, so they run concurrently with each other and
//! never see a mutation that has not been persisted.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo() -> script_rag_core::RagResult<()> {
//! use std::sync::Arc;
//! use script_rag::embedding::HashProvider;
//! use script_rag::service::{RetrievalService, ServiceOptions};
//!
//! let provider = Arc::new(HashProvider::new(None, 384).unwrap());
//! let service = RetrievalService::open("./rag_vector_db", provider, ServiceOptions::default()).await?;
//! service.add_document("episode-01", "INT. CLASSROOM - DAY ...").await?;
//! let context = service.format_context("who is in the classroom?", 5, 2000).await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use script_rag_core::chunk::{chunk_text, validate_window, TextSpan};
use script_rag_core::embedding::EmbeddingProvider;
use script_rag_core::error::{RagError, RagResult};
use script_rag_core::index::{new_index, Metric, VectorIndex};
use script_rag_core::metadata::MetadataStore;
use script_rag_core::models::{ChunkId, ChunkRecord, Document, RetrievedChunk};

use crate::config::Config;
use crate::persist::{ExpectedConfig, PersistenceManager, SnapshotParts, WriterLock};

/// First id handed out by a fresh store.
const FIRST_CHUNK_ID: ChunkId = ChunkId(1);

/// Tunables fixed for the lifetime of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub metric: Metric,
    /// Texts per embedding call.
    pub batch_size: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            metric: Metric::Cosine,
            batch_size: 64,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            metric: config.index.metric,
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Lifecycle of the in-memory store relative to its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Uninitialized,
    /// Fresh empty store or restored snapshot, unchanged since.
    Loaded,
    /// A mutation is applied in memory but not yet saved.
    Mutated,
    Persisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    ReadWrite,
    ReadOnly,
    Rebuild,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddReport {
    pub document_id: Uuid,
    pub document_name: String,
    pub chunks: usize,
    pub chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub storage_path: PathBuf,
    pub documents: usize,
    pub chunks: usize,
    /// Distinct document names, sorted.
    pub sources: Vec<String>,
    pub config: ExpectedConfig,
    pub next_chunk_id: u64,
    pub last_saved: Option<DateTime<Utc>>,
    pub state: ServiceState,
}

struct Inner {
    index: Box<dyn VectorIndex>,
    metadata: MetadataStore,
    next_chunk_id: ChunkId,
    created_at: DateTime<Utc>,
    last_saved: Option<DateTime<Utc>>,
    state: ServiceState,
}

impl Inner {
    fn empty(dimension: usize, metric: Metric) -> Self {
        Self {
            index: new_index(dimension, metric),
            metadata: MetadataStore::new(),
            next_chunk_id: FIRST_CHUNK_ID,
            created_at: Utc::now(),
            last_saved: None,
            state: ServiceState::Uninitialized,
        }
    }

    /// Write a document's chunks into both stores. On error, anything
    /// written so far is taken back out.
    fn apply_add(
        &mut self,
        document: &Document,
        spans: Vec<TextSpan>,
        vectors: Vec<Vec<f32>>,
    ) -> RagResult<Vec<ChunkId>> {
        let mut ids = Vec::with_capacity(spans.len());
        let now = Utc::now();

        for (span, vector) in spans.into_iter().zip(vectors) {
            let id = self.next_chunk_id;
            if let Err(e) = self.index.add(id, vector) {
                self.undo_add(document.id, &ids);
                return Err(e);
            }
            self.metadata.put(ChunkRecord {
                id,
                document_id: document.id,
                document_name: document.name.clone(),
                start_offset: span.start,
                end_offset: span.end,
                text: span.text,
                created_at: now,
            });
            ids.push(id);
            self.next_chunk_id = id.next();
        }
        self.metadata.insert_document(document.clone());
        Ok(ids)
    }

    fn undo_add(&mut self, document_id: Uuid, ids: &[ChunkId]) {
        self.index.remove(ids);
        for id in ids {
            self.metadata.delete(*id);
        }
        self.metadata.remove_document(document_id);
    }

    /// State to return to when a mutation is abandoned.
    fn settled_state(&self) -> ServiceState {
        if self.last_saved.is_some() {
            ServiceState::Persisted
        } else {
            ServiceState::Loaded
        }
    }
}

pub struct RetrievalService {
    provider: Arc<dyn EmbeddingProvider>,
    persistence: PersistenceManager,
    expected: ExpectedConfig,
    options: ServiceOptions,
    inner: RwLock<Inner>,
    lock: Option<WriterLock>,
}

impl RetrievalService {
    /// Open `storage` for reading and writing, taking the writer lock.
    ///
    /// # Errors
    ///
    /// `StoreLocked` if another writer holds the store, plus every load
    /// error of [`PersistenceManager::load`].
    pub async fn open(
        storage: impl Into<PathBuf>,
        provider: Arc<dyn EmbeddingProvider>,
        options: ServiceOptions,
    ) -> RagResult<Self> {
        Self::open_with(storage.into(), provider, options, OpenMode::ReadWrite)
    }

    /// Open without the writer lock. Mutations fail with `ReadOnly`.
    pub async fn open_read_only(
        storage: impl Into<PathBuf>,
        provider: Arc<dyn EmbeddingProvider>,
        options: ServiceOptions,
    ) -> RagResult<Self> {
        Self::open_with(storage.into(), provider, options, OpenMode::ReadOnly)
    }

    /// Open for [`rebuild`](Self::rebuild): the index artifact is not read,
    /// so a missing, corrupt or inconsistent index does not block opening.
    /// Version and model compatibility are still enforced.
    pub async fn open_for_rebuild(
        storage: impl Into<PathBuf>,
        provider: Arc<dyn EmbeddingProvider>,
        options: ServiceOptions,
    ) -> RagResult<Self> {
        Self::open_with(storage.into(), provider, options, OpenMode::Rebuild)
    }

    fn open_with(
        root: PathBuf,
        provider: Arc<dyn EmbeddingProvider>,
        mut options: ServiceOptions,
        mode: OpenMode,
    ) -> RagResult<Self> {
        validate_window(options.chunk_size, options.chunk_overlap)?;
        options.batch_size = options.batch_size.max(1);

        let expected = ExpectedConfig {
            embedding_model: provider.model_name().to_string(),
            dimension: provider.dims(),
            metric: options.metric,
            chunk_size: options.chunk_size,
            chunk_overlap: options.chunk_overlap,
        };

        let lock = match mode {
            OpenMode::ReadOnly => None,
            OpenMode::ReadWrite | OpenMode::Rebuild => Some(WriterLock::acquire(&root)?),
        };
        let persistence = PersistenceManager::new(&root);

        let mut inner = Inner::empty(expected.dimension, expected.metric);
        if mode == OpenMode::Rebuild {
            if let Some(loaded) = persistence.load_metadata_only(&expected)? {
                inner.metadata = loaded.metadata;
                inner.next_chunk_id = ChunkId(loaded.config.next_chunk_id);
                inner.created_at = loaded.config.created_at;
                inner.last_saved = Some(loaded.config.updated_at);
            }
        } else if let Some(loaded) = persistence.load(&expected)? {
            inner.index = loaded.index;
            inner.metadata = loaded.metadata;
            inner.next_chunk_id = ChunkId(loaded.config.next_chunk_id);
            inner.created_at = loaded.config.created_at;
            inner.last_saved = Some(loaded.config.updated_at);
        }
        inner.state = ServiceState::Loaded;

        tracing::info!(
            path = %root.display(),
            mode = ?mode,
            documents = inner.metadata.document_count(),
            chunks = inner.metadata.len(),
            model = %expected.embedding_model,
            "retrieval service opened"
        );

        Ok(Self {
            provider,
            persistence,
            expected,
            options,
            inner: RwLock::new(inner),
            lock,
        })
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.read().await.state
    }

    // ============ Mutations ============

    pub async fn add_document(&self, name: &str, text: &str) -> RagResult<AddReport> {
        self.add_document_with_cancel(name, text, &CancellationToken::new())
            .await
    }

    /// Like [`add_document`](Self::add_document), aborting with `Cancelled`
    /// if `token` fires before the write phase.
    pub async fn add_document_with_cancel(
        &self,
        name: &str,
        text: &str,
        token: &CancellationToken,
    ) -> RagResult<AddReport> {
        self.add(Document::new(name, text), token).await
    }

    /// Add a prepared [`Document`] (e.g. one carrying its source path).
    pub async fn add(&self, document: Document, token: &CancellationToken) -> RagResult<AddReport> {
        self.ensure_writable()?;

        let spans = chunk_text(
            &document.raw_text,
            self.options.chunk_size,
            self.options.chunk_overlap,
        )?;
        if spans.is_empty() {
            return Err(RagError::EmptyDocument(document.name.clone()));
        }

        let mut guard = self.inner.write().await;

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = self.embed_all(&texts, token).await?;

        if token.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        let dimension = guard.index.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let inner = &mut *guard;
        let prior_next = inner.next_chunk_id;
        let ids = inner.apply_add(&document, spans, vectors)?;
        inner.state = ServiceState::Mutated;

        if let Err(e) = self.persist(inner) {
            inner.undo_add(document.id, &ids);
            inner.next_chunk_id = prior_next;
            inner.state = inner.settled_state();
            tracing::warn!(document = %document.name, error = %e, "add rolled back");
            return Err(e);
        }

        tracing::info!(
            document = %document.name,
            chunks = ids.len(),
            "document added"
        );
        Ok(AddReport {
            document_id: document.id,
            document_name: document.name,
            chunks: ids.len(),
            chunk_ids: ids,
        })
    }

    /// Remove every document named `name` and all of their chunks.
    ///
    /// Returns the number of chunks removed; an unknown name is `Ok(0)` and
    /// writes nothing.
    pub async fn remove_document(&self, name: &str) -> RagResult<usize> {
        self.ensure_writable()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let documents: Vec<Document> = inner
            .metadata
            .documents_named(name)
            .into_iter()
            .cloned()
            .collect();
        if documents.is_empty() {
            tracing::debug!(document = name, "remove: no such document");
            return Ok(0);
        }

        let mut records = Vec::new();
        let mut vectors = Vec::new();
        for document in &documents {
            let ids: Vec<ChunkId> = inner
                .metadata
                .list_by_document(document.id)
                .iter()
                .map(|r| r.id)
                .collect();
            for id in ids {
                if let Some(vector) = inner.index.get(id) {
                    vectors.push((id, vector.to_vec()));
                }
                if let Some(record) = inner.metadata.delete(id) {
                    records.push(record);
                }
            }
            inner.metadata.remove_document(document.id);
        }
        let ids: Vec<ChunkId> = records.iter().map(|r| r.id).collect();
        inner.index.remove(&ids);
        inner.state = ServiceState::Mutated;

        if let Err(e) = self.persist(inner) {
            for (id, vector) in vectors {
                if let Err(restore) = inner.index.add(id, vector) {
                    tracing::error!(chunk = %id, error = %restore, "failed to restore vector");
                }
            }
            for record in records {
                inner.metadata.put(record);
            }
            for document in documents {
                inner.metadata.insert_document(document);
            }
            inner.state = inner.settled_state();
            tracing::warn!(document = name, error = %e, "remove rolled back");
            return Err(e);
        }

        tracing::info!(
            document = name,
            documents = documents.len(),
            chunks = ids.len(),
            "document removed"
        );
        Ok(ids.len())
    }

    /// Empty both stores and persist the empty snapshot. Chunk ids keep
    /// counting from where they were.
    pub async fn clear(&self) -> RagResult<()> {
        self.ensure_writable()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let fresh = new_index(self.expected.dimension, self.expected.metric);
        let old_index = std::mem::replace(&mut inner.index, fresh);
        let old_metadata = std::mem::take(&mut inner.metadata);
        inner.state = ServiceState::Mutated;

        if let Err(e) = self.persist(inner) {
            inner.index = old_index;
            inner.metadata = old_metadata;
            inner.state = inner.settled_state();
            return Err(e);
        }
        if let Err(e) = self.persistence.discard_superseded() {
            tracing::warn!(error = %e, "cleared data left in an old snapshot generation");
        }

        tracing::info!(
            documents = old_metadata.document_count(),
            chunks = old_metadata.len(),
            "store cleared"
        );
        Ok(())
    }

    /// Re-embed every chunk in metadata and replace the index with the
    /// result. Returns the number of chunks embedded.
    pub async fn rebuild(&self) -> RagResult<usize> {
        self.ensure_writable()?;
        let mut guard = self.inner.write().await;

        let records: Vec<(ChunkId, String)> = guard
            .metadata
            .records()
            .map(|r| (r.id, r.text.clone()))
            .collect();
        let texts: Vec<String> = records.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.embed_all(&texts, &CancellationToken::new()).await?;

        let mut index = new_index(self.expected.dimension, self.expected.metric);
        for ((id, _), vector) in records.iter().zip(vectors) {
            index.add(*id, vector)?;
        }

        let inner = &mut *guard;
        let old_index = std::mem::replace(&mut inner.index, index);
        inner.state = ServiceState::Mutated;
        if let Err(e) = self.persist(inner) {
            inner.index = old_index;
            inner.state = inner.settled_state();
            return Err(e);
        }

        tracing::info!(chunks = records.len(), "index rebuilt");
        Ok(records.len())
    }

    // ============ Reads ============

    /// Top-`k` chunks for `text`, best first. A blank query or an empty
    /// store yields no results.
    pub async fn query(&self, text: &str, k: usize) -> RagResult<Vec<RetrievedChunk>> {
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        if inner.index.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.provider.embed_query(text).await?;
        let hits = inner.index.search(&vector, k)?;
        tracing::debug!(k, hits = hits.len(), "query");

        hits.into_iter()
            .enumerate()
            .map(|(i, hit)| -> RagResult<RetrievedChunk> {
                let record = inner
                    .metadata
                    .get(hit.id)
                    .ok_or(RagError::IndexInconsistency {
                        index_only: 1,
                        metadata_only: 0,
                    })?;
                Ok(RetrievedChunk {
                    rank: i + 1,
                    chunk_id: hit.id,
                    document_name: record.document_name.clone(),
                    chunk_text: record.text.clone(),
                    start_offset: record.start_offset,
                    end_offset: record.end_offset,
                    score: hit.score,
                })
            })
            .collect()
    }

    /// Ranked context blocks for a generation prompt, at most `max_chars`
    /// characters long.
    pub async fn format_context(&self, text: &str, k: usize, max_chars: usize) -> RagResult<String> {
        let results = self.query(text, k).await?;
        Ok(render_context(&results, max_chars))
    }

    pub async fn info(&self) -> StoreInfo {
        let inner = self.inner.read().await;
        let mut sources: Vec<String> = inner.metadata.documents().map(|d| d.name.clone()).collect();
        sources.sort();
        sources.dedup();

        StoreInfo {
            storage_path: self.persistence.root().to_path_buf(),
            documents: inner.metadata.document_count(),
            chunks: inner.metadata.len(),
            sources,
            config: self.expected.clone(),
            next_chunk_id: inner.next_chunk_id.value(),
            last_saved: inner.last_saved,
            state: inner.state,
        }
    }

    // ============ Internals ============

    fn ensure_writable(&self) -> RagResult<()> {
        if self.lock.is_none() {
            return Err(RagError::ReadOnly);
        }
        Ok(())
    }

    async fn embed_all(
        &self,
        texts: &[String],
        token: &CancellationToken,
    ) -> RagResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size) {
            if token.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            let embedded = tokio::select! {
                _ = token.cancelled() => return Err(RagError::Cancelled),
                result = self.provider.embed(batch) => result?,
            };
            if embedded.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn persist(&self, inner: &mut Inner) -> RagResult<()> {
        let saved = self.persistence.save(
            &self.expected,
            SnapshotParts {
                index: inner.index.as_ref(),
                metadata: &inner.metadata,
                next_chunk_id: inner.next_chunk_id,
                created_at: inner.created_at,
            },
        )?;
        inner.last_saved = Some(saved.updated_at);
        inner.state = ServiceState::Persisted;
        Ok(())
    }
}

/// Render ranked results as context blocks.
///
/// Blocks are appended in rank order. The first block that would push the
/// output past `max_chars` is cut at a character boundary and nothing
/// follows it.
pub fn render_context(results: &[RetrievedChunk], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for result in results {
        let block = format!(
            "--- Context {} (Similarity: {:.3}) ---\nSource: {}\n{}\n\n",
            result.rank, result.score, result.document_name, result.chunk_text
        );
        let len = block.chars().count();
        if used + len <= max_chars {
            out.push_str(&block);
            used += len;
            continue;
        }
        out.extend(block.chars().take(max_chars - used));
        break;
    }
    out
}
