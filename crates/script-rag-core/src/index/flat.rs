//! Exhaustive flat [`VectorIndex`].
//!
//! Vectors are packed row-major into one contiguous `Vec<f32>` and every
//! query scores every row. This is the baseline backend: exact, simple, and
//! fast enough for tens of thousands of chunks. Beyond that a
//! graph-based structure should be plugged in behind the same trait.
//!
//! The packed layout has no point delete. [`FlatIndex::remove`] rebuilds the
//! storage from the surviving rows, an O(n) copy on every removal.

use std::collections::{HashMap, HashSet};

use crate::error::{RagError, RagResult};
use crate::models::ChunkId;

use super::{rank_hits, Hit, Metric, VectorIndex};

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    /// Row `i` of `data` belongs to `ids[i]`.
    ids: Vec<ChunkId>,
    data: Vec<f32>,
    rows: HashMap<ChunkId, usize>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            ids: Vec::new(),
            data: Vec::new(),
            rows: HashMap::new(),
        }
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    fn check_dimension(&self, len: usize) -> RagResult<()> {
        if len != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn ids(&self) -> Vec<ChunkId> {
        let mut ids = self.ids.clone();
        ids.sort();
        ids
    }

    fn get(&self, id: ChunkId) -> Option<&[f32]> {
        self.rows.get(&id).map(|&i| self.row(i))
    }

    fn add(&mut self, id: ChunkId, vector: Vec<f32>) -> RagResult<()> {
        self.check_dimension(vector.len())?;
        if self.rows.contains_key(&id) {
            return Err(RagError::DuplicateChunk(id));
        }
        self.rows.insert(id, self.ids.len());
        self.ids.push(id);
        self.data.extend_from_slice(&vector);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<Hit>> {
        self.check_dimension(query.len())?;
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, &id)| Hit {
                id,
                score: self.metric.score(query, self.row(i)),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    fn remove(&mut self, ids: &[ChunkId]) -> usize {
        let doomed: HashSet<ChunkId> = ids
            .iter()
            .copied()
            .filter(|id| self.rows.contains_key(id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut ids_out = Vec::with_capacity(self.ids.len() - doomed.len());
        let mut data_out = Vec::with_capacity(ids_out.capacity() * self.dimension);
        for (i, &id) in self.ids.iter().enumerate() {
            if !doomed.contains(&id) {
                ids_out.push(id);
                data_out.extend_from_slice(self.row(i));
            }
        }

        self.rows = ids_out.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        self.ids = ids_out;
        self.data = data_out;
        doomed.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
        self.rows.clear();
    }
}
