// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod pipeline;

pub use pipeline::{
    find_images, FileFailure, IngestConfig, IngestError, IngestPipeline, IngestReport,
    RepresentativeArtifact,
};
