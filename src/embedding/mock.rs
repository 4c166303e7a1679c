// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::types::DetectedFace;
use crate::core::vector_ops::content_hash;
use crate::embedding::engine::{EmbeddingError, FaceEngine, ImageInput, WholeImageEmbedder};

/// Canned face engine keyed by image content hash.
///
/// Images without an entry report no faces.
#[derive(Clone, Default)]
pub struct StaticFaceEngine {
    name: String,
    faces: HashMap<String, Vec<DetectedFace>>,
    unavailable: bool,
    failing: bool,
    detect_calls: Arc<AtomicUsize>,
}

impl StaticFaceEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Registers the faces returned for images with exactly these bytes.
    pub fn with_faces(mut self, image_bytes: &[u8], faces: Vec<DetectedFace>) -> Self {
        self.faces.insert(content_hash(image_bytes), faces);
        self
    }

    /// Makes `initialize` fail.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Makes every `detect` call fail.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaceEngine for StaticFaceEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        if self.unavailable {
            return Err(EmbeddingError::Unavailable(format!(
                "{} is configured as unavailable",
                self.name
            )));
        }
        Ok(())
    }

    async fn detect(&self, image: &ImageInput<'_>) -> Result<Vec<DetectedFace>, EmbeddingError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(EmbeddingError::Request(format!("{} failed", self.name)));
        }
        Ok(self
            .faces
            .get(&content_hash(image.bytes))
            .cloned()
            .unwrap_or_default())
    }
}

/// Whole-image embedder returning canned vectors keyed by content hash.
#[derive(Clone, Default)]
pub struct StaticWholeImageEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl StaticWholeImageEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, image_bytes: &[u8], vector: Vec<f32>) -> Self {
        self.vectors.insert(content_hash(image_bytes), vector);
        self
    }
}

#[async_trait]
impl WholeImageEmbedder for StaticWholeImageEmbedder {
    fn name(&self) -> &str {
        "static-whole-image"
    }

    async fn embed(&self, image: &ImageInput<'_>) -> Result<Vec<f32>, EmbeddingError> {
        self.vectors
            .get(&content_hash(image.bytes))
            .cloned()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no canned vector for image".to_string()))
    }
}
