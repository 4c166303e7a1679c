// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod factory;
pub mod http_storage;
pub mod local;

pub use factory::StorageFactory;
pub use http_storage::{HttpObjectStorage, HttpStorageConfig};
pub use local::{write_atomic, LocalObjectStorage};

// Re-export the storage trait from core
pub use crate::core::storage::{ObjectStorage, StorageError};
