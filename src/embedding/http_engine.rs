// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::types::{BoundingBox, DetectedFace};
use crate::embedding::engine::{EmbeddingError, FaceEngine, ImageInput, WholeImageEmbedder};

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<RemoteFace>,
}

#[derive(Debug, Deserialize)]
struct RemoteFace {
    embedding: Vec<f32>,
    /// `[x, y, w, h]` in pixels.
    bbox: [i64; 4],
}

impl RemoteFace {
    fn into_detected(self) -> DetectedFace {
        let [x, y, w, h] = self.bbox;
        DetectedFace::new(
            self.embedding,
            BoundingBox::new(
                x.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                y.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                w.clamp(0, u32::MAX as i64) as u32,
                h.clamp(0, u32::MAX as i64) as u32,
            ),
        )
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

fn build_client(timeout: Duration) -> Result<Client, EmbeddingError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Unavailable(e.to_string()))
}

/// Face engine backed by an external embedding service.
///
/// `GET {base}/health` must succeed during initialization. Detection posts the
/// raw image to `{base}/detect` and expects
/// `{"faces": [{"embedding": [..], "bbox": [x, y, w, h]}]}`.
pub struct HttpFaceEngine {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpFaceEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EmbeddingError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            name: format!("http:{}", base_url),
            base_url,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl FaceEngine for HttpFaceEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("health check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        info!(engine = %self.name, "face engine is healthy");
        Ok(())
    }

    async fn detect(&self, image: &ImageInput<'_>) -> Result<Vec<DetectedFace>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/detect", self.base_url))
            .header("content-type", "application/octet-stream")
            .body(image.bytes.to_vec())
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Request(format!(
                "detect returned {}",
                response.status()
            )));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        debug!(engine = %self.name, faces = parsed.faces.len(), "detect finished");
        Ok(parsed.faces.into_iter().map(RemoteFace::into_detected).collect())
    }
}

/// Whole-image embedder posting to `{base}/embed` and reading `{"embedding": [..]}`.
pub struct HttpWholeImageEmbedder {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpWholeImageEmbedder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EmbeddingError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            name: format!("http:{}", base_url),
            base_url,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl WholeImageEmbedder for HttpWholeImageEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, image: &ImageInput<'_>) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .header("content-type", "application/octet-stream")
            .body(image.bytes.to_vec())
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Request(format!(
                "embed returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        Ok(parsed.embedding)
    }
}
