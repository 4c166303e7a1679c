// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteMetadataStore;
pub use store::{InMemoryMetadataStore, MetadataError, MetadataStore, PhotoInsert};
