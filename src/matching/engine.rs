// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::{Metric, PhotoMatch};
use crate::core::vector_ops::is_zero_vector;
use crate::embedding::extractor::FaceExtractor;
use crate::index::core::IndexError;
use crate::index::persistence::IndexStore;
use crate::metadata::store::{MetadataError, MetadataStore};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Search task failed: {0}")]
    Task(String),
}

/// Why a search returned nothing without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchNote {
    NoFace,
    IndexNotReady,
}

impl MatchNote {
    pub fn message(&self) -> &'static str {
        match self {
            MatchNote::NoFace => "No face detected in the selfie.",
            MatchNote::IndexNotReady => "The photo index is empty. Please ingest photos first.",
        }
    }
}

impl Serialize for MatchNote {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub matches: Vec<PhotoMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<MatchNote>,
}

impl MatchOutcome {
    fn empty(note: MatchNote) -> Self {
        Self {
            matches: Vec::new(),
            note: Some(note),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub top_k: usize,
    /// Minimum cosine similarity. Ignored under L2.
    pub threshold: f32,
    pub dimension: usize,
    pub metric: Metric,
}

pub struct MatchEngine {
    index_store: Arc<IndexStore>,
    metadata: Arc<dyn MetadataStore>,
    extractor: Arc<FaceExtractor>,
    config: MatchConfig,
}

impl MatchEngine {
    pub fn new(
        index_store: Arc<IndexStore>,
        metadata: Arc<dyn MetadataStore>,
        extractor: Arc<FaceExtractor>,
        config: MatchConfig,
    ) -> Self {
        Self {
            index_store,
            metadata,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Extracts the representative face of `image` and searches with it.
    pub async fn search_image(&self, image: &[u8], event_slug: &str) -> Result<MatchOutcome, MatchError> {
        let query = self.extractor.representative(image).await;
        self.search(&query, event_slug).await
    }

    /// Ranks the event's photos against `query`.
    ///
    /// Results keep the index's native order (best first) and list each
    /// photo once, at its best-scoring face.
    pub async fn search(&self, query: &[f32], event_slug: &str) -> Result<MatchOutcome, MatchError> {
        if is_zero_vector(query) {
            debug!(event = event_slug, "zero query, nothing to search");
            return Ok(MatchOutcome::empty(MatchNote::NoFace));
        }

        let index = self
            .index_store
            .load(event_slug, self.config.dimension, self.config.metric)
            .await?;
        if index.is_empty() {
            return Ok(MatchOutcome::empty(MatchNote::IndexNotReady));
        }

        let metric = index.metric();
        let threshold = self.config.threshold;
        let top_k = self.config.top_k;
        let query = query.to_vec();

        let hits: Vec<(i64, f32)> = tokio::task::spawn_blocking(move || {
            let neighbors = index.search(&query, top_k)?;
            Ok::<_, IndexError>(
                neighbors
                    .into_iter()
                    .filter(|n| !n.is_empty_slot())
                    .filter_map(|n| {
                        let photo_id = index.photo_id(n.position as usize)?;
                        Some((photo_id, n.similarity(metric)))
                    })
                    .filter(|(_, score)| metric != Metric::Cosine || *score >= threshold)
                    .collect::<Vec<(i64, f32)>>(),
            )
        })
        .await
        .map_err(|e| MatchError::Task(e.to_string()))??;

        let mut wanted: Vec<i64> = hits.iter().map(|(id, _)| *id).collect();
        wanted.sort_unstable();
        wanted.dedup();
        let photos = self.metadata.find_photos_by_ids(&wanted).await?;

        let mut seen = HashSet::with_capacity(wanted.len());
        let matches: Vec<PhotoMatch> = hits
            .into_iter()
            .filter(|(id, _)| seen.insert(*id))
            .filter_map(|(id, score)| {
                photos.get(&id).map(|photo| PhotoMatch {
                    photo_id: id,
                    url: photo.uri.clone(),
                    thumb: photo.thumb_uri.clone(),
                    score,
                })
            })
            .collect();

        info!(event = event_slug, matches = matches.len(), %metric, "search finished");
        Ok(MatchOutcome {
            matches,
            note: None,
        })
    }
}
