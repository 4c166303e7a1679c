// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::cmp::Ordering;
use thiserror::Error;

use crate::core::storage::StorageError;
use crate::core::types::Metric;
use crate::core::vector_ops::{
    distance_to_similarity, dot_product_scalar, l2_normalize, normalize_rows,
    squared_l2_distance,
};

/// Position marker for padded search slots that hold no vector.
pub const NO_RESULT: i64 = -1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {vectors} vectors but {ids} ids")]
    LengthMismatch { vectors: usize, ids: usize },

    #[error("Index corruption: {0}")]
    Corruption(String),

    #[error("Invalid event slug: {0}")]
    InvalidSlug(String),

    #[error("Incompatible version: found {found}, expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One slot of a top-K result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row in the index, or [`NO_RESULT`] for padding.
    pub position: i64,
    /// Inner product under cosine, squared distance under L2.
    pub raw: f32,
}

impl Neighbor {
    fn empty(metric: Metric) -> Self {
        let raw = match metric {
            Metric::Cosine => f32::NEG_INFINITY,
            Metric::L2 => f32::INFINITY,
        };
        Self {
            position: NO_RESULT,
            raw,
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.position < 0
    }

    /// Score where higher is better regardless of metric.
    pub fn similarity(&self, metric: Metric) -> f32 {
        match metric {
            Metric::Cosine => self.raw,
            Metric::L2 => distance_to_similarity(self.raw),
        }
    }
}

/// A flat similarity index whose rows are tagged with photo ids.
///
/// Vectors are stored row-major in a single buffer, and `ids[i]` names the
/// photo that produced row `i`. The two always have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVectors {
    dimension: usize,
    metric: Metric,
    data: Vec<f32>,
    ids: Vec<i64>,
}

impl IndexedVectors {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Reassembles an index from persisted parts, rejecting misaligned input.
    pub fn from_parts(
        dimension: usize,
        metric: Metric,
        data: Vec<f32>,
        ids: Vec<i64>,
    ) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::Corruption("zero dimension".to_string()));
        }
        if data.len() % dimension != 0 {
            return Err(IndexError::Corruption(format!(
                "vector buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        let count = data.len() / dimension;
        if count != ids.len() {
            return Err(IndexError::Corruption(format!(
                "{} vectors but {} ids",
                count,
                ids.len()
            )));
        }
        Ok(Self {
            dimension,
            metric,
            data,
            ids,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.count() {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    pub fn photo_id(&self, position: usize) -> Option<i64> {
        self.ids.get(position).copied()
    }

    /// Appends `vectors`, tagging row `i` with `ids[i]`.
    ///
    /// Under cosine every vector is L2-normalized before insertion. Input is
    /// validated up front, so a rejected batch leaves the index untouched.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, ids: &[i64]) -> Result<(), IndexError> {
        if vectors.len() != ids.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let start = self.data.len();
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(&v);
        }
        if self.metric == Metric::Cosine {
            normalize_rows(&mut self.data[start..], self.dimension);
        }
        self.ids.extend_from_slice(ids);

        debug_assert_eq!(self.data.len(), self.ids.len() * self.dimension);
        Ok(())
    }

    /// Exact top-`k` search.
    ///
    /// The result always has `k` slots, best first; slots beyond `count()`
    /// are padded with [`NO_RESULT`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        if self.metric == Metric::Cosine {
            l2_normalize(&mut query);
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(i, row)| Neighbor {
                position: i as i64,
                raw: match self.metric {
                    Metric::Cosine => dot_product_scalar(&query, row),
                    Metric::L2 => squared_l2_distance(&query, row),
                },
            })
            .collect();

        let metric = self.metric;
        let order = |a: &Neighbor, b: &Neighbor| -> Ordering {
            let by_score = match metric {
                Metric::Cosine => b.raw.total_cmp(&a.raw),
                Metric::L2 => a.raw.total_cmp(&b.raw),
            };
            by_score.then(a.position.cmp(&b.position))
        };

        if k < scored.len() {
            if k > 0 {
                scored.select_nth_unstable_by(k - 1, order);
            }
            scored.truncate(k);
        }
        scored.sort_by(order);
        scored.resize(k, Neighbor::empty(self.metric));

        Ok(scored)
    }
}
