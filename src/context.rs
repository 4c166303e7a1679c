// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Context as _;
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::core::storage::ObjectStorage;
use crate::embedding::extractor::FaceExtractor;
use crate::index::persistence::IndexStore;
use crate::ingest::pipeline::{IngestConfig, IngestPipeline};
use crate::matching::engine::{MatchConfig, MatchEngine};
use crate::metadata::sqlite::SqliteMetadataStore;
use crate::metadata::store::MetadataStore;
use crate::storage::factory::StorageFactory;

/// The wired-up collaborators shared by the server and the ingest CLI.
#[derive(Clone)]
pub struct EngineContext {
    pub settings: Settings,
    pub storage: Arc<dyn ObjectStorage>,
    pub metadata: Arc<dyn MetadataStore>,
    pub extractor: Arc<FaceExtractor>,
    pub index_store: Arc<IndexStore>,
}

impl EngineContext {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn ObjectStorage>,
        metadata: Arc<dyn MetadataStore>,
        extractor: Arc<FaceExtractor>,
    ) -> Self {
        let index_store = Arc::new(IndexStore::new(
            settings.index_dir(),
            storage.clone(),
            settings.storage.index_container.clone(),
        ));
        Self {
            settings,
            storage,
            metadata,
            extractor,
            index_store,
        }
    }

    /// Builds storage, the SQLite store and HTTP face engines from `settings`,
    /// then initializes the engines.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(settings.index_dir())
            .await
            .with_context(|| format!("creating {}", settings.index_dir().display()))?;
        tokio::fs::create_dir_all(settings.embeddings_dir())
            .await
            .with_context(|| format!("creating {}", settings.embeddings_dir().display()))?;

        let storage = StorageFactory::create(&settings.storage, settings.media_root.join("blobs"))
            .context("building object storage")?;
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteMetadataStore::connect(&settings.database_url)
                .await
                .context("opening metadata store")?,
        );
        let extractor = Arc::new(
            FaceExtractor::from_settings(&settings.engines, settings.dimension)
                .context("building face engines")?,
        );

        let statuses = extractor.initialize().await;
        let available = statuses.iter().filter(|s| s.available).count();
        info!(available, configured = statuses.len(), "face engines initialized");

        Ok(Self::new(settings, storage, metadata, extractor))
    }

    pub fn ingest_pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            self.metadata.clone(),
            self.storage.clone(),
            self.extractor.clone(),
            self.index_store.clone(),
            IngestConfig {
                photo_container: self.settings.storage.photo_container.clone(),
                embeddings_dir: self.settings.embeddings_dir(),
                dimension: self.settings.dimension,
                metric: self.settings.metric,
            },
        )
    }

    pub fn match_engine(&self) -> MatchEngine {
        MatchEngine::new(
            self.index_store.clone(),
            self.metadata.clone(),
            self.extractor.clone(),
            MatchConfig {
                top_k: self.settings.top_k,
                threshold: self.settings.match_threshold,
                dimension: self.settings.dimension,
                metric: self.settings.metric,
            },
        )
    }
}
