// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use image::ImageReader;
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::core::types::DetectedFace;
use crate::core::vector_ops::{conform_dimension, is_zero_vector, l2_normalize};
use crate::embedding::engine::{EmbeddingError, FaceEngine, ImageInput, WholeImageEmbedder};
use crate::embedding::http_engine::{HttpFaceEngine, HttpWholeImageEmbedder};

/// Initialization outcome of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub name: String,
    pub available: bool,
    pub error: Option<String>,
}

/// Faces and representative vector computed from one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    pub faces: Vec<DetectedFace>,
    /// Largest face, whole-image fallback, or the zero vector.
    pub representative: Vec<f32>,
    /// False when the bytes were not a readable image.
    pub decoded: bool,
}

/// Ordered face-engine fallback with a fixed output dimension.
///
/// Engines are tried in order; the first that reports at least one face wins.
/// Unavailable or failing engines are skipped. Nothing here returns an error:
/// the worst case is "no faces" and a zero representative.
pub struct FaceExtractor {
    engines: Vec<Box<dyn FaceEngine>>,
    whole_image: Option<Box<dyn WholeImageEmbedder>>,
    dimension: usize,
    status: OnceCell<Vec<EngineStatus>>,
}

impl FaceExtractor {
    pub fn new(engines: Vec<Box<dyn FaceEngine>>, dimension: usize) -> Self {
        Self {
            engines,
            whole_image: None,
            dimension,
            status: OnceCell::new(),
        }
    }

    pub fn with_whole_image(mut self, embedder: Box<dyn WholeImageEmbedder>) -> Self {
        self.whole_image = Some(embedder);
        self
    }

    /// Builds HTTP engines for every configured endpoint.
    pub fn from_settings(settings: &EngineSettings, dimension: usize) -> Result<Self, EmbeddingError> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        let mut engines: Vec<Box<dyn FaceEngine>> = Vec::with_capacity(settings.face_engine_urls.len());
        for url in &settings.face_engine_urls {
            engines.push(Box::new(HttpFaceEngine::new(url.clone(), timeout)?));
        }
        if engines.is_empty() {
            warn!("no face engines configured; every image will report no faces");
        }

        let mut extractor = Self::new(engines, dimension);
        if let Some(url) = &settings.whole_image_url {
            extractor = extractor.with_whole_image(Box::new(HttpWholeImageEmbedder::new(url.clone(), timeout)?));
        }
        Ok(extractor)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension]
    }

    /// Initializes every engine once. Later calls return the recorded statuses.
    pub async fn initialize(&self) -> &[EngineStatus] {
        self.status
            .get_or_init(|| async {
                let mut statuses = Vec::with_capacity(self.engines.len());
                for engine in &self.engines {
                    let status = match engine.initialize().await {
                        Ok(()) => {
                            info!(engine = engine.name(), "face engine ready");
                            EngineStatus {
                                name: engine.name().to_string(),
                                available: true,
                                error: None,
                            }
                        }
                        Err(e) => {
                            warn!(engine = engine.name(), error = %e, "face engine unavailable");
                            EngineStatus {
                                name: engine.name().to_string(),
                                available: false,
                                error: Some(e.to_string()),
                            }
                        }
                    };
                    statuses.push(status);
                }
                statuses
            })
            .await
    }

    pub async fn extract(&self, bytes: &[u8]) -> Vec<DetectedFace> {
        self.analyze(bytes).await.faces
    }

    pub async fn representative(&self, bytes: &[u8]) -> Vec<f32> {
        self.analyze(bytes).await.representative
    }

    pub async fn analyze(&self, bytes: &[u8]) -> FaceAnalysis {
        let Some((width, height)) = image_dimensions(bytes) else {
            debug!(size = bytes.len(), "bytes are not a decodable image");
            return FaceAnalysis {
                faces: Vec::new(),
                representative: self.zero_vector(),
                decoded: false,
            };
        };

        let input = ImageInput::new(bytes, width, height);
        let faces = self.detect_faces(&input).await;
        // Selection uses the boxes as reported; clamping can shrink an edge face.
        let representative = match largest_face(&faces) {
            Some(face) => face.embedding.clone(),
            None => self.whole_image_vector(&input).await,
        };
        let faces = faces
            .into_iter()
            .map(|face| DetectedFace::new(face.embedding, face.bbox.clamp_to(width, height)))
            .collect();

        FaceAnalysis {
            faces,
            representative,
            decoded: true,
        }
    }

    async fn detect_faces(&self, input: &ImageInput<'_>) -> Vec<DetectedFace> {
        let statuses = self.initialize().await;

        for (engine, status) in self.engines.iter().zip(statuses) {
            if !status.available {
                continue;
            }
            match engine.detect(input).await {
                Ok(raw) => {
                    let faces = self.conform_faces(raw);
                    if !faces.is_empty() {
                        debug!(engine = engine.name(), faces = faces.len(), "faces detected");
                        return faces;
                    }
                    debug!(engine = engine.name(), "no faces, trying next engine");
                }
                Err(e) => {
                    warn!(engine = engine.name(), error = %e, "face engine failed, trying next engine");
                }
            }
        }
        Vec::new()
    }

    fn conform_faces(&self, faces: Vec<DetectedFace>) -> Vec<DetectedFace> {
        faces
            .into_iter()
            .filter_map(|face| {
                let embedding = self.conform(face.embedding)?;
                Some(DetectedFace::new(embedding, face.bbox))
            })
            .collect()
    }

    /// Fixes the length and normalizes; zero or non-finite vectors are dropped.
    fn conform(&self, embedding: Vec<f32>) -> Option<Vec<f32>> {
        let mut v = conform_dimension(embedding, self.dimension);
        if is_zero_vector(&v) || v.iter().any(|x| !x.is_finite()) {
            return None;
        }
        l2_normalize(&mut v);
        Some(v)
    }

    async fn whole_image_vector(&self, input: &ImageInput<'_>) -> Vec<f32> {
        let Some(embedder) = &self.whole_image else {
            return self.zero_vector();
        };
        match embedder.embed(input).await {
            Ok(v) => self.conform(v).unwrap_or_else(|| self.zero_vector()),
            Err(e) => {
                warn!(embedder = embedder.name(), error = %e, "whole-image embedding failed");
                self.zero_vector()
            }
        }
    }
}

/// Largest face by box area; the earliest face wins ties.
pub fn largest_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces.iter().fold(None, |best: Option<&DetectedFace>, face| match best {
        Some(b) if b.bbox.area() >= face.bbox.area() => Some(b),
        _ => Some(face),
    })
}

/// Reads the image header for its size; pixel data is not decoded.
fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
