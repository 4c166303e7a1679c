// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Dimension of every face embedding stored in an event index.
pub const FACE_DIMENSION: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown metric: {0} (expected \"cosine\" or \"l2\")")]
pub struct UnknownMetric(pub String);

/// Similarity metric, fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Inner product over L2-normalized vectors.
    #[default]
    Cosine,
    /// Squared Euclidean distance.
    L2,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" | "ip" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// Face bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Area used for face selection. Degenerate sides count as one pixel.
    pub fn area(&self) -> u64 {
        self.w.max(1) as u64 * self.h.max(1) as u64
    }

    /// Clamps the box so it lies inside a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.clamp(0, width as i32);
        let y = self.y.clamp(0, height as i32);
        let right = (self.x as i64 + self.w as i64).clamp(0, width as i64);
        let bottom = (self.y as i64 + self.h as i64).clamp(0, height as i64);
        Self {
            x,
            y,
            w: (right - x as i64).max(0) as u32,
            h: (bottom - y as i64).max(0) as u32,
        }
    }
}

/// One face found in an image: its embedding and where it was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Vec<f32>,
    pub bbox: BoundingBox,
}

impl DetectedFace {
    pub fn new(embedding: Vec<f32>, bbox: BoundingBox) -> Self {
        Self { embedding, bbox }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub event_id: i64,
    pub uri: String,
    pub thumb_uri: String,
    pub embedding_path: String,
    pub file_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for a photo that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub event_id: i64,
    pub uri: String,
    pub thumb_uri: String,
    pub embedding_path: String,
    pub file_hash: String,
}

/// A ranked match as presented to callers. Higher `score` is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMatch {
    pub photo_id: i64,
    pub url: String,
    pub thumb: String,
    pub score: f32,
}
