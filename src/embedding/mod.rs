// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod engine;
pub mod extractor;
pub mod http_engine;
pub mod mock;

pub use engine::{EmbeddingError, FaceEngine, ImageInput, WholeImageEmbedder};
pub use extractor::{EngineStatus, FaceAnalysis, FaceExtractor};
pub use http_engine::{HttpFaceEngine, HttpWholeImageEmbedder};
pub use mock::{StaticFaceEngine, StaticWholeImageEmbedder};
