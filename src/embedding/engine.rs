// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::DetectedFace;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine request failed: {0}")]
    Request(String),

    #[error("Malformed engine response: {0}")]
    InvalidResponse(String),
}

/// A validated image handed to engines.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    /// The original encoded bytes.
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> ImageInput<'a> {
    pub fn new(bytes: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
        }
    }
}

/// A face detection and embedding backend.
#[async_trait]
pub trait FaceEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Prepares the engine. An error marks the engine unavailable.
    async fn initialize(&self) -> Result<(), EmbeddingError>;

    /// Returns every face found in the image; an empty list means no face.
    async fn detect(&self, image: &ImageInput<'_>) -> Result<Vec<DetectedFace>, EmbeddingError>;
}

/// Produces one embedding for a whole image, used when no face is detected.
#[async_trait]
pub trait WholeImageEmbedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, image: &ImageInput<'_>) -> Result<Vec<f32>, EmbeddingError>;
}
