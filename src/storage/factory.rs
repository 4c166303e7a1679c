// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{StorageMode, StorageSettings};
use crate::core::storage::{ObjectStorage, RetryObjectStorage, StorageError};
use crate::storage::http_storage::{HttpObjectStorage, HttpStorageConfig};
use crate::storage::local::LocalObjectStorage;

pub struct StorageFactory;

impl StorageFactory {
    /// Builds the configured backend, wrapped in retry with jittered backoff.
    ///
    /// `fallback_root` is used as the blob root in local mode when no
    /// `STORAGE_BASE_URL` is configured.
    pub fn create(
        settings: &StorageSettings,
        fallback_root: PathBuf,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        Self::log_configuration_summary(settings);

        let storage: Arc<dyn ObjectStorage> = match settings.mode {
            StorageMode::Local => {
                let root = settings
                    .base_url
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or(fallback_root);
                let mut local = LocalObjectStorage::new(root);
                if let Some(public) = &settings.public_url {
                    local = local.with_public_base(public.clone());
                }
                Arc::new(RetryObjectStorage::with_jitter(local, settings.retry_attempts))
            }
            StorageMode::Http => {
                let base_url = settings.base_url.clone().ok_or_else(|| {
                    StorageError::ConfigError("STORAGE_BASE_URL required for http mode".to_string())
                })?;
                let http = HttpObjectStorage::new(HttpStorageConfig {
                    base_url,
                    public_url: settings.public_url.clone(),
                    sas_token: settings.sas_token.clone(),
                    timeout: Duration::from_millis(settings.timeout_ms),
                })?;
                Arc::new(RetryObjectStorage::with_jitter(http, settings.retry_attempts))
            }
        };

        Ok(storage)
    }

    fn log_configuration_summary(settings: &StorageSettings) {
        info!(
            mode = ?settings.mode,
            base_url = settings.base_url.as_deref().unwrap_or("<media root>"),
            photo_container = %settings.photo_container,
            index_container = %settings.index_container,
            sas_token = if settings.sas_token.is_some() { "configured" } else { "not configured" },
            retry_attempts = settings.retry_attempts,
            "object storage configuration"
        );
    }
}
