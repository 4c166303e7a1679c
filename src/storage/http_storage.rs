// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::core::storage::{validate_key, ObjectStorage, StorageError};

#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    /// Service endpoint, e.g. `https://account.blob.core.windows.net`.
    pub base_url: String,
    /// Prefix for public URIs; defaults to `base_url`.
    pub public_url: Option<String>,
    /// Shared access signature appended as the query string.
    pub sas_token: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:10000".to_string(),
            public_url: None,
            sas_token: None,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Blob service client speaking plain `PUT`/`GET` on `<base>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    base_url: String,
    public_url: String,
    sas_token: Option<String>,
    client: Client,
}

impl HttpObjectStorage {
    pub fn new(config: HttpStorageConfig) -> Result<Self, StorageError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(StorageError::ConfigError(format!(
                "Invalid base URL: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let public_url = config
            .public_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());

        Ok(Self {
            base_url,
            public_url,
            sas_token: config
                .sas_token
                .map(|t| t.trim_start_matches('?').to_string()),
            client,
        })
    }

    fn blob_url(&self, key: &str, container: &str) -> String {
        let mut url = format!("{}/{}/{}", self.base_url, container, key);
        if let Some(token) = &self.sas_token {
            url.push('?');
            url.push_str(token);
        }
        url
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        container: &str,
    ) -> Result<String, StorageError> {
        validate_key(key)?;
        let size = data.len();

        let response = self
            .client
            .put(self.blob_url(key, container))
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(format!("Upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::NetworkError(format!(
                "Upload of {}/{} failed with status {}",
                container,
                key,
                response.status()
            )));
        }

        debug!(container, key, size, "uploaded blob");
        Ok(self.public_url(key, container))
    }

    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;

        let response = self
            .client
            .get(self.blob_url(key, container))
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(format!("Failed to download: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| StorageError::NetworkError(format!("Failed to read body: {}", e)))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(StorageError::NetworkError(format!(
                "Download of {}/{} failed with status {}",
                container, key, status
            ))),
        }
    }

    fn public_url(&self, key: &str, container: &str) -> String {
        format!("{}/{}/{}", self.public_url, container, key)
    }
}
