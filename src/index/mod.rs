// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod core;
pub mod persistence;

pub use self::core::{IndexError, IndexedVectors, Neighbor, NO_RESULT};
pub use persistence::{ArtifactPaths, IndexSource, IndexStore};
