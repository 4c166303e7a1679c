// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use photo_match::core::storage::{MockObjectStorage, ObjectStorage};
use photo_match::core::types::{BoundingBox, DetectedFace, Metric};
use photo_match::embedding::{FaceEngine, FaceExtractor, StaticFaceEngine, StaticWholeImageEmbedder};
use photo_match::index::IndexStore;
use photo_match::ingest::{IngestConfig, IngestPipeline};
use photo_match::matching::{MatchConfig, MatchEngine};
use photo_match::metadata::{InMemoryMetadataStore, MetadataStore};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const DIM: usize = 8;
pub const PHOTOS: &str = "photos";
pub const INDEXES: &str = "indexes";

/// A small solid-color PNG. Different colors give different content hashes.
pub fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(32, 32, Rgb(color));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Unit basis vector `e_axis` of length [`DIM`].
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis] = 1.0;
    v
}

pub fn face(embedding: Vec<f32>, w: u32, h: u32) -> DetectedFace {
    DetectedFace::new(embedding, BoundingBox::new(0, 0, w, h))
}

pub fn write_image(dir: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Everything an ingest or match test needs, wired to in-memory backends.
pub struct Harness {
    pub media: TempDir,
    pub photos_dir: TempDir,
    pub storage: MockObjectStorage,
    pub metadata: InMemoryMetadataStore,
    pub extractor: Arc<FaceExtractor>,
    pub index_store: Arc<IndexStore>,
    pub metric: Metric,
}

impl Harness {
    pub fn new(engine: StaticFaceEngine) -> Self {
        Self::build(engine, None, Metric::Cosine)
    }

    pub fn with_metric(engine: StaticFaceEngine, metric: Metric) -> Self {
        Self::build(engine, None, metric)
    }

    pub fn with_whole_image(engine: StaticFaceEngine, whole: StaticWholeImageEmbedder) -> Self {
        Self::build(engine, Some(whole), Metric::Cosine)
    }

    fn build(engine: StaticFaceEngine, whole: Option<StaticWholeImageEmbedder>, metric: Metric) -> Self {
        let media = TempDir::new().unwrap();
        let storage = MockObjectStorage::new();
        let engines: Vec<Box<dyn FaceEngine>> = vec![Box::new(engine)];
        let mut extractor = FaceExtractor::new(engines, DIM);
        if let Some(whole) = whole {
            extractor = extractor.with_whole_image(Box::new(whole));
        }
        let remote: Arc<dyn ObjectStorage> = Arc::new(storage.clone());
        let index_store = Arc::new(IndexStore::new(media.path().join("indices"), remote, INDEXES));

        Self {
            media,
            photos_dir: TempDir::new().unwrap(),
            storage,
            metadata: InMemoryMetadataStore::new(),
            extractor: Arc::new(extractor),
            index_store,
            metric,
        }
    }

    pub fn add_image(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        write_image(self.photos_dir.path(), relative, bytes)
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            Arc::new(self.metadata.clone()) as Arc<dyn MetadataStore>,
            Arc::new(self.storage.clone()),
            self.extractor.clone(),
            self.index_store.clone(),
            IngestConfig {
                photo_container: PHOTOS.to_string(),
                embeddings_dir: self.media.path().join("embeddings"),
                dimension: DIM,
                metric: self.metric,
            },
        )
    }

    pub fn matcher(&self, threshold: f32) -> MatchEngine {
        MatchEngine::new(
            self.index_store.clone(),
            Arc::new(self.metadata.clone()),
            self.extractor.clone(),
            MatchConfig {
                top_k: 50,
                threshold,
                dimension: DIM,
                metric: self.metric,
            },
        )
    }
}
