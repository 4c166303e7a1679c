// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod storage;
pub mod types;
pub mod vector_ops;

pub use storage::{MockObjectStorage, ObjectStorage, RetryConfig, RetryObjectStorage, StorageError};
pub use types::{
    BoundingBox, DetectedFace, Event, Metric, NewPhoto, Photo, PhotoMatch, UnknownMetric,
    FACE_DIMENSION,
};
