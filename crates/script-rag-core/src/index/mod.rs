//! Vector index abstraction for chunk embeddings.
//!
//! The [`VectorIndex`] trait defines the nearest-neighbour contract the
//! retrieval service relies on, so the search structure can be swapped
//! (exhaustive flat scan today, an approximate graph later) without touching
//! callers.
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`add`](VectorIndex::add) | Rejects vectors whose length is not the index dimension |
//! | [`search`](VectorIndex::search) | Best match first; returns every entry when fewer than `k` exist; equal scores ordered by ascending chunk id |
//! | [`remove`](VectorIndex::remove) | Removes the given ids; unknown ids are ignored |
//!
//! Scores are "higher is better" for every [`Metric`].

pub mod flat;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, euclidean_distance};
use crate::error::RagResult;
use crate::models::ChunkId;

pub use flat::FlatIndex;

/// Similarity metric, fixed when an index is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, in `[-1, 1]`.
    #[default]
    Cosine,
    /// `1 / (1 + L2 distance)`, in `(0, 1]`.
    Euclidean,
}

impl Metric {
    /// Score `candidate` against `query`. Higher is better.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::Euclidean => 1.0 / (1.0 + euclidean_distance(query, candidate)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!(
                "unknown metric '{other}'. Must be cosine or euclidean."
            )),
        }
    }
}

/// A single search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: ChunkId,
    pub score: f32,
}

/// Nearest-neighbour search over fixed-dimension chunk vectors.
pub trait VectorIndex: Send + Sync + fmt::Debug {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored ids in ascending order.
    fn ids(&self) -> Vec<ChunkId>;

    fn get(&self, id: ChunkId) -> Option<&[f32]>;

    /// Insert a vector under `id`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` for a wrong-length vector, `DuplicateChunk` if
    /// `id` is already present.
    fn add(&mut self, id: ChunkId, vector: Vec<f32>) -> RagResult<()>;

    /// Return up to `k` hits, best first.
    fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<Hit>>;

    /// Remove the given ids, returning how many were present.
    fn remove(&mut self, ids: &[ChunkId]) -> usize;

    fn clear(&mut self);
}

/// Construct the default index for a dimension and metric.
pub fn new_index(dimension: usize, metric: Metric) -> Box<dyn VectorIndex> {
    Box::new(FlatIndex::new(dimension, metric))
}

/// Sort hits best first, ties by ascending id, and keep the top `k`.
pub fn rank_hits(mut hits: Vec<Hit>, k: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_parse_and_display() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("dot".parse::<Metric>().is_err());
        assert_eq!(Metric::Euclidean.to_string(), "euclidean");
    }

    #[test]
    fn test_euclidean_score_is_higher_for_closer() {
        let q = [0.0, 0.0];
        let near = Metric::Euclidean.score(&q, &[0.1, 0.0]);
        let far = Metric::Euclidean.score(&q, &[5.0, 0.0]);
        assert!(near > far);
        assert_eq!(Metric::Euclidean.score(&q, &q), 1.0);
    }

    #[test]
    fn test_rank_hits_tie_break() {
        let hits = vec![
            Hit { id: ChunkId(9), score: 0.5 },
            Hit { id: ChunkId(2), score: 0.9 },
            Hit { id: ChunkId(4), score: 0.5 },
            Hit { id: ChunkId(1), score: 0.5 },
        ];
        let ranked = rank_hits(hits, 3);
        let ids: Vec<u64> = ranked.iter().map(|h| h.id.0).collect();
        assert_eq!(ids, vec![2, 1, 4]);
    }
}
