// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::core::storage::ObjectStorage;
use crate::core::types::{Metric, NewPhoto};
use crate::core::vector_ops::{content_hash, is_zero_vector};
use crate::embedding::extractor::FaceExtractor;
use crate::index::core::IndexError;
use crate::index::persistence::{validate_slug, IndexStore};
use crate::metadata::store::{MetadataError, MetadataStore, PhotoInsert};
use crate::storage::local::write_atomic;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Folder not found: {0}")]
    FolderNotFound(PathBuf),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub photo_container: String,
    /// Where representative embeddings are written.
    pub embeddings_dir: PathBuf,
    pub dimension: usize,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub event_slug: String,
    pub files_found: usize,
    pub ingested: usize,
    pub skipped_duplicates: usize,
    /// Photos recorded without any indexable vector.
    pub without_vectors: usize,
    pub faces_indexed: usize,
    pub fallback_indexed: usize,
    pub failures: Vec<FileFailure>,
    pub index_updated: bool,
}

impl IngestReport {
    pub fn vectors_indexed(&self) -> usize {
        self.faces_indexed + self.fallback_indexed
    }
}

/// Representative embedding as written next to each photo record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeArtifact {
    pub dimension: usize,
    pub vector: Vec<f32>,
}

/// What a single file contributed to the run.
enum FileOutcome {
    Duplicate,
    Ingested {
        photo_id: i64,
        vectors: Vec<Vec<f32>>,
        fallback: bool,
    },
}

/// Vectors waiting to be appended to the index at the end of a run.
#[derive(Default)]
struct PendingVectors {
    vectors: Vec<Vec<f32>>,
    ids: Vec<i64>,
}

pub struct IngestPipeline {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStorage>,
    extractor: Arc<FaceExtractor>,
    index_store: Arc<IndexStore>,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStorage>,
        extractor: Arc<FaceExtractor>,
        index_store: Arc<IndexStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            extractor,
            index_store,
            config,
        }
    }

    /// Ingests every image under `folder` into the event's index.
    ///
    /// Per-file problems are collected in the report; only metadata and index
    /// failures abort the run.
    pub async fn run(&self, event_slug: &str, folder: &Path) -> Result<IngestReport, IngestError> {
        validate_slug(event_slug)?;
        let event = self.metadata.get_or_create_event(event_slug, event_slug).await?;
        let files = find_images(folder)?;
        info!(event = event_slug, files = files.len(), "starting ingestion");

        let mut report = IngestReport {
            event_slug: event_slug.to_string(),
            files_found: files.len(),
            ..Default::default()
        };
        let mut pending = PendingVectors::default();

        for path in &files {
            match self.ingest_file(event.id, path).await {
                Ok(FileOutcome::Duplicate) => {
                    info!(path = %path.display(), "duplicate already ingested, skipping");
                    report.skipped_duplicates += 1;
                }
                Ok(FileOutcome::Ingested {
                    photo_id,
                    vectors,
                    fallback,
                }) => {
                    report.ingested += 1;
                    if vectors.is_empty() {
                        report.without_vectors += 1;
                    } else if fallback {
                        report.fallback_indexed += 1;
                    } else {
                        report.faces_indexed += vectors.len();
                    }
                    pending.ids.extend(std::iter::repeat(photo_id).take(vectors.len()));
                    pending.vectors.extend(vectors);
                }
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "failed to ingest file");
                    report.failures.push(FileFailure {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        if pending.vectors.is_empty() {
            info!(event = event_slug, "no new embeddings to index");
        } else {
            self.commit(event_slug, pending).await?;
            report.index_updated = true;
        }

        info!(
            event = event_slug,
            ingested = report.ingested,
            duplicates = report.skipped_duplicates,
            vectors = report.vectors_indexed(),
            failures = report.failures.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Per-file work. Failures come back as a reason for the report.
    async fn ingest_file(&self, event_id: i64, path: &Path) -> Result<FileOutcome, String> {
        let data = fs::read(path)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        let file_hash = content_hash(&data);

        if self
            .metadata
            .find_photo_by_hash(&file_hash)
            .await
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Ok(FileOutcome::Duplicate);
        }

        // All heavy work happens before the database is touched again
        let analysis = self.extractor.analyze(&data).await;
        if !analysis.decoded {
            return Err("not a decodable image".to_string());
        }

        let key = upload_key(path);
        let uri = self
            .storage
            .upload(data, &key, &self.config.photo_container)
            .await
            .map_err(|e| format!("upload failed: {}", e))?;

        if self
            .metadata
            .find_photo_by_hash(&file_hash)
            .await
            .map_err(|e| e.to_string())?
            .is_some()
        {
            return Ok(FileOutcome::Duplicate);
        }

        let embedding_path = self
            .save_representative(&analysis.representative)
            .await
            .map_err(|e| format!("saving representative embedding failed: {}", e))?;

        let inserted = self
            .metadata
            .insert_photo_if_absent(NewPhoto {
                event_id,
                uri: uri.clone(),
                thumb_uri: uri.clone(),
                embedding_path: embedding_path.to_string_lossy().into_owned(),
                file_hash,
            })
            .await
            .map_err(|e| e.to_string())?;

        let photo = match inserted {
            PhotoInsert::Created(photo) => photo,
            PhotoInsert::Duplicate { existing_id } => {
                debug!(existing_id, "hash recorded concurrently, dropping artifact");
                let _ = fs::remove_file(&embedding_path).await;
                return Ok(FileOutcome::Duplicate);
            }
        };

        let (vectors, fallback) = if !analysis.faces.is_empty() {
            let vectors: Vec<Vec<f32>> = analysis.faces.into_iter().map(|f| f.embedding).collect();
            info!(path = %path.display(), faces = vectors.len(), uri = %uri, "indexed faces");
            (vectors, false)
        } else if !is_zero_vector(&analysis.representative) {
            info!(path = %path.display(), "no faces, using representative embedding");
            (vec![analysis.representative], true)
        } else {
            info!(path = %path.display(), "no faces and no representative embedding");
            (Vec::new(), false)
        };

        Ok(FileOutcome::Ingested {
            photo_id: photo.id,
            vectors,
            fallback,
        })
    }

    async fn save_representative(&self, vector: &[f32]) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.config.embeddings_dir).await?;
        let path = self
            .config
            .embeddings_dir
            .join(format!("{}.cbor", Uuid::new_v4().simple()));
        let artifact = RepresentativeArtifact {
            dimension: vector.len(),
            vector: vector.to_vec(),
        };
        let bytes = serde_cbor::to_vec(&artifact)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    async fn commit(&self, event_slug: &str, pending: PendingVectors) -> Result<(), IngestError> {
        let mut index = self
            .index_store
            .load(event_slug, self.config.dimension, self.config.metric)
            .await?;
        let added = pending.ids.len();
        index.add(pending.vectors, &pending.ids)?;
        self.index_store.persist(&index, event_slug).await?;
        info!(event = event_slug, added, total = index.count(), "indexed new embeddings locally");

        self.index_store.push(event_slug).await?;
        Ok(())
    }
}

/// `<parent folder name>/<random id><original extension>`.
fn upload_key(path: &Path) -> String {
    let subfolder = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| "photos".to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}/{}{}", subfolder, Uuid::new_v4().simple(), extension)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Every image below `folder`, sorted.
pub fn find_images(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::FolderNotFound(folder.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}
