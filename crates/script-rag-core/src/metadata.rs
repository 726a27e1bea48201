//! In-memory chunk metadata store.
//!
//! Maps [`ChunkId`] → [`ChunkRecord`] and keeps the table of registered
//! [`Document`]s. Iteration over chunks is always in ascending id order,
//! which within a single document is source order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use uuid::Uuid;

use crate::models::{ChunkId, ChunkRecord, Document};

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    documents: BTreeMap<Uuid, Document>,
    chunks: BTreeMap<ChunkId, ChunkRecord>,
    by_document: HashMap<Uuid, BTreeSet<ChunkId>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted parts.
    pub fn from_parts(
        documents: impl IntoIterator<Item = Document>,
        chunks: impl IntoIterator<Item = ChunkRecord>,
    ) -> Self {
        let mut store = Self::new();
        for doc in documents {
            store.insert_document(doc);
        }
        for record in chunks {
            store.put(record);
        }
        store
    }

    // ============ Chunks ============

    /// Insert or replace a chunk record, returning the previous one.
    pub fn put(&mut self, record: ChunkRecord) -> Option<ChunkRecord> {
        self.by_document
            .entry(record.document_id)
            .or_default()
            .insert(record.id);
        let previous = self.chunks.insert(record.id, record);
        if let Some(prev) = &previous {
            let current_doc = self.chunks[&prev.id].document_id;
            if prev.document_id != current_doc {
                self.unlink(prev.document_id, prev.id);
            }
        }
        previous
    }

    pub fn get(&self, id: ChunkId) -> Option<&ChunkRecord> {
        self.chunks.get(&id)
    }

    pub fn delete(&mut self, id: ChunkId) -> Option<ChunkRecord> {
        let record = self.chunks.remove(&id)?;
        self.unlink(record.document_id, id);
        Some(record)
    }

    /// Records of one document in ascending id (source) order.
    pub fn list_by_document(&self, document_id: Uuid) -> Vec<&ChunkRecord> {
        self.by_document
            .get(&document_id)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default()
    }

    /// All chunk ids in ascending order.
    pub fn ids(&self) -> Vec<ChunkId> {
        self.chunks.keys().copied().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Highest chunk id currently stored.
    pub fn max_id(&self) -> Option<ChunkId> {
        self.chunks.keys().next_back().copied()
    }

    fn unlink(&mut self, document_id: Uuid, id: ChunkId) {
        if let Some(ids) = self.by_document.get_mut(&document_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_document.remove(&document_id);
            }
        }
    }

    // ============ Documents ============

    pub fn insert_document(&mut self, doc: Document) {
        self.documents.insert(doc.id, doc);
    }

    /// Remove a document row. Its chunk records are left untouched; callers
    /// delete them alongside the matching index entries.
    pub fn remove_document(&mut self, id: Uuid) -> Option<Document> {
        self.documents.remove(&id)
    }

    pub fn document(&self, id: Uuid) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Every document registered under `name`, oldest first.
    pub fn documents_named(&self, name: &str) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self
            .documents
            .values()
            .filter(|d| d.name == name)
            .collect();
        docs.sort_by_key(|d| d.added_at);
        docs
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.chunks.clear();
        self.by_document.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: u64, doc: &Document, start: usize) -> ChunkRecord {
        ChunkRecord {
            id: ChunkId(id),
            document_id: doc.id,
            document_name: doc.name.clone(),
            start_offset: start,
            end_offset: start + 4,
            text: format!("c{id}"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let doc = Document::new("ep1", "text");
        let mut store = MetadataStore::new();
        store.insert_document(doc.clone());
        assert!(store.put(record(1, &doc, 0)).is_none());
        assert_eq!(store.get(ChunkId(1)).unwrap().text, "c1");
        assert_eq!(store.len(), 1);

        let removed = store.delete(ChunkId(1)).unwrap();
        assert_eq!(removed.id, ChunkId(1));
        assert!(store.get(ChunkId(1)).is_none());
        assert!(store.list_by_document(doc.id).is_empty());
        assert!(store.delete(ChunkId(1)).is_none());
    }

    #[test]
    fn test_list_by_document_in_id_order() {
        let a = Document::new("a", "x");
        let b = Document::new("b", "y");
        let mut store = MetadataStore::new();
        store.put(record(5, &a, 8));
        store.put(record(2, &b, 0));
        store.put(record(1, &a, 0));
        store.put(record(3, &a, 4));

        let ids: Vec<u64> = store
            .list_by_document(a.id)
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(store.ids(), vec![ChunkId(1), ChunkId(2), ChunkId(3), ChunkId(5)]);
        assert_eq!(store.max_id(), Some(ChunkId(5)));
    }

    #[test]
    fn test_documents_named() {
        let mut store = MetadataStore::new();
        store.insert_document(Document::new("pilot", "one"));
        store.insert_document(Document::new("pilot", "two"));
        store.insert_document(Document::new("finale", "three"));
        assert_eq!(store.documents_named("pilot").len(), 2);
        assert!(store.documents_named("missing").is_empty());
        assert_eq!(store.document_count(), 3);
    }

    #[test]
    fn test_from_parts_and_clear() {
        let doc = Document::new("ep", "abcdefgh");
        let chunks = vec![record(1, &doc, 0), record(2, &doc, 4)];
        let mut store = MetadataStore::from_parts(vec![doc.clone()], chunks);
        assert_eq!(store.list_by_document(doc.id).len(), 2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.document_count(), 0);
    }
}
