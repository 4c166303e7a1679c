// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::storage::ObjectStorage;
use crate::core::types::Metric;
use crate::index::core::{IndexError, IndexedVectors};
use crate::storage::local::write_atomic;

pub const ARTIFACT_VERSION: u32 = 1;

/// How often a load re-reads a cache pair whose halves come from different writes.
const TORN_READ_RETRIES: usize = 3;
const TORN_READ_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub version: u32,
    pub generation: String,
    pub dimension: usize,
    pub metric: Metric,
    pub count: usize,
    pub vectors: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsArtifact {
    pub version: u32,
    pub generation: String,
    pub ids: Vec<i64>,
}

/// Where an index came from on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    LocalCache,
    Remote,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub ids: PathBuf,
}

pub fn index_file_name(event_slug: &str) -> String {
    format!("{}.index.cbor", event_slug)
}

pub fn ids_file_name(event_slug: &str) -> String {
    format!("{}.ids.cbor", event_slug)
}

/// Slugs become file names, so they must be a single safe path segment.
pub fn validate_slug(event_slug: &str) -> Result<(), IndexError> {
    let valid = !event_slug.is_empty()
        && event_slug != "."
        && event_slug != ".."
        && event_slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidSlug(event_slug.to_string()))
    }
}

/// Serializes an index into its two artifacts, stamped with one generation id.
pub fn encode_artifacts(index: &IndexedVectors) -> Result<(Vec<u8>, Vec<u8>), IndexError> {
    let generation = Uuid::new_v4().simple().to_string();
    let index_artifact = IndexArtifact {
        version: ARTIFACT_VERSION,
        generation: generation.clone(),
        dimension: index.dimension(),
        metric: index.metric(),
        count: index.count(),
        vectors: index.data().to_vec(),
    };
    let ids_artifact = IdsArtifact {
        version: ARTIFACT_VERSION,
        generation,
        ids: index.ids().to_vec(),
    };

    let index_bytes = serde_cbor::to_vec(&index_artifact)
        .map_err(|e| IndexError::Serialization(e.to_string()))?;
    let ids_bytes =
        serde_cbor::to_vec(&ids_artifact).map_err(|e| IndexError::Serialization(e.to_string()))?;
    Ok((index_bytes, ids_bytes))
}

/// Outcome of decoding an artifact pair.
#[derive(Debug)]
pub enum DecodedPair {
    Complete(IndexedVectors),
    /// The halves carry different generation ids.
    Torn { index: String, ids: String },
}

pub fn decode_artifacts(index_bytes: &[u8], ids_bytes: &[u8]) -> Result<DecodedPair, IndexError> {
    let index_artifact: IndexArtifact = serde_cbor::from_slice(index_bytes)
        .map_err(|e| IndexError::Corruption(format!("unreadable index artifact: {}", e)))?;
    let ids_artifact: IdsArtifact = serde_cbor::from_slice(ids_bytes)
        .map_err(|e| IndexError::Corruption(format!("unreadable ids artifact: {}", e)))?;

    for found in [index_artifact.version, ids_artifact.version] {
        if found != ARTIFACT_VERSION {
            return Err(IndexError::IncompatibleVersion {
                found,
                expected: ARTIFACT_VERSION,
            });
        }
    }

    if index_artifact.generation != ids_artifact.generation {
        return Ok(DecodedPair::Torn {
            index: index_artifact.generation,
            ids: ids_artifact.generation,
        });
    }

    if index_artifact.count != ids_artifact.ids.len() {
        return Err(IndexError::Corruption(format!(
            "index holds {} vectors but id array holds {}",
            index_artifact.count,
            ids_artifact.ids.len()
        )));
    }

    IndexedVectors::from_parts(
        index_artifact.dimension,
        index_artifact.metric,
        index_artifact.vectors,
        ids_artifact.ids,
    )
    .map(DecodedPair::Complete)
}

/// Resolves, persists and publishes per-event indices.
///
/// Loading tries the local cache, then the remote index container, then falls
/// back to a fresh empty index. Nothing is kept in memory between calls.
pub struct IndexStore {
    cache_dir: PathBuf,
    remote: Arc<dyn ObjectStorage>,
    container: String,
}

impl IndexStore {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        remote: Arc<dyn ObjectStorage>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            remote,
            container: container.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn paths(&self, event_slug: &str) -> ArtifactPaths {
        ArtifactPaths {
            index: self.cache_dir.join(index_file_name(event_slug)),
            ids: self.cache_dir.join(ids_file_name(event_slug)),
        }
    }

    pub async fn load(
        &self,
        event_slug: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<IndexedVectors, IndexError> {
        let (index, _) = self.load_with_source(event_slug, dimension, metric).await?;
        Ok(index)
    }

    pub async fn load_with_source(
        &self,
        event_slug: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<(IndexedVectors, IndexSource), IndexError> {
        validate_slug(event_slug)?;
        let paths = self.paths(event_slug);

        // 1. Local cache
        if let Some(index) = self.load_from_cache(&paths).await? {
            info!(event = event_slug, vectors = index.count(), "loaded index from local cache");
            return Self::check_shape(index, dimension, metric).map(|i| (i, IndexSource::LocalCache));
        }

        // 2. Remote artifact store
        info!(event = event_slug, "local index not found, trying remote storage");
        if let Some(index) = self.load_from_remote(event_slug, &paths).await? {
            info!(event = event_slug, vectors = index.count(), "loaded index from remote storage");
            return Self::check_shape(index, dimension, metric).map(|i| (i, IndexSource::Remote));
        }

        // 3. Fresh
        info!(event = event_slug, %metric, dimension, "no index found, creating an empty one");
        Ok((IndexedVectors::new(dimension, metric), IndexSource::Fresh))
    }

    /// Writes both artifacts to the local cache, replacing existing files atomically.
    pub async fn persist(&self, index: &IndexedVectors, event_slug: &str) -> Result<(), IndexError> {
        validate_slug(event_slug)?;
        let paths = self.paths(event_slug);
        let (index_bytes, ids_bytes) = encode_artifacts(index)?;

        fs::create_dir_all(&self.cache_dir).await?;
        write_atomic(&paths.index, &index_bytes).await?;
        write_atomic(&paths.ids, &ids_bytes).await?;

        info!(event = event_slug, vectors = index.count(), "persisted index to local cache");
        Ok(())
    }

    /// Uploads the cached artifacts to the remote index container.
    pub async fn push(&self, event_slug: &str) -> Result<(), IndexError> {
        validate_slug(event_slug)?;
        let paths = self.paths(event_slug);

        let index_bytes = fs::read(&paths.index).await?;
        let ids_bytes = fs::read(&paths.ids).await?;

        self.remote
            .upload(index_bytes, &index_file_name(event_slug), &self.container)
            .await?;
        self.remote
            .upload(ids_bytes, &ids_file_name(event_slug), &self.container)
            .await?;

        info!(event = event_slug, container = %self.container, "uploaded index artifacts");
        Ok(())
    }

    async fn load_from_cache(&self, paths: &ArtifactPaths) -> Result<Option<IndexedVectors>, IndexError> {
        for attempt in 0..=TORN_READ_RETRIES {
            if !fs::try_exists(&paths.index).await? || !fs::try_exists(&paths.ids).await? {
                return Ok(None);
            }

            let index_bytes = match read_if_present(&paths.index).await? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };
            let ids_bytes = match read_if_present(&paths.ids).await? {
                Some(bytes) => bytes,
                None => return Ok(None),
            };

            match decode_artifacts(&index_bytes, &ids_bytes)? {
                DecodedPair::Complete(index) => return Ok(Some(index)),
                DecodedPair::Torn { index, ids } => {
                    debug!(attempt, index_generation = %index, ids_generation = %ids, "cache pair is mid-update, re-reading");
                    tokio::time::sleep(TORN_READ_BACKOFF).await;
                }
            }
        }

        Err(IndexError::Corruption(format!(
            "artifacts {} and {} belong to different generations",
            paths.index.display(),
            paths.ids.display()
        )))
    }

    async fn load_from_remote(
        &self,
        event_slug: &str,
        paths: &ArtifactPaths,
    ) -> Result<Option<IndexedVectors>, IndexError> {
        let index_bytes = self.download_or_miss(&index_file_name(event_slug)).await;
        let ids_bytes = self.download_or_miss(&ids_file_name(event_slug)).await;

        let (index_bytes, ids_bytes) = match (index_bytes, ids_bytes) {
            (Some(i), Some(d)) => (i, d),
            _ => return Ok(None),
        };

        let index = match decode_artifacts(&index_bytes, &ids_bytes)? {
            DecodedPair::Complete(index) => index,
            DecodedPair::Torn { index, ids } => {
                return Err(IndexError::Corruption(format!(
                    "remote artifacts belong to different generations ({} vs {})",
                    index, ids
                )))
            }
        };

        write_atomic(&paths.index, &index_bytes).await?;
        write_atomic(&paths.ids, &ids_bytes).await?;
        Ok(Some(index))
    }

    /// A failed download counts as a miss: the next resolution step takes over.
    async fn download_or_miss(&self, key: &str) -> Option<Vec<u8>> {
        match self.remote.download(key, &self.container).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, container = %self.container, error = %e, "could not download index artifact");
                None
            }
        }
    }

    fn check_shape(
        index: IndexedVectors,
        dimension: usize,
        metric: Metric,
    ) -> Result<IndexedVectors, IndexError> {
        if index.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: index.dimension(),
            });
        }
        if index.metric() != metric {
            warn!(
                stored = %index.metric(),
                requested = %metric,
                "stored index uses a different metric; keeping the stored one"
            );
        }
        Ok(index)
    }
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, IndexError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
