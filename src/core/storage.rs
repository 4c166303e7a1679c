// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::NetworkError(_) | StorageError::IoError(_))
    }
}

/// Durable blob storage keyed by `(container, key)`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `data`, overwriting any existing blob, and returns its public URI.
    async fn upload(&self, data: Vec<u8>, key: &str, container: &str)
        -> Result<String, StorageError>;

    /// Fetches a blob. A missing blob is `Ok(None)`, not an error.
    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// URI a blob is (or would be) reachable at.
    fn public_url(&self, key: &str, container: &str) -> String;
}

#[async_trait]
impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        container: &str,
    ) -> Result<String, StorageError> {
        (**self).upload(data, key, container).await
    }

    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).download(key, container).await
    }

    fn public_url(&self, key: &str, container: &str) -> String {
        (**self).public_url(key, container)
    }
}

/// Rejects keys that could escape their container.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

pub struct RetryObjectStorage<T> {
    inner: T,
    config: RetryConfig,
    use_jitter: bool,
}

impl<T: ObjectStorage> RetryObjectStorage<T> {
    pub fn new(inner: T, max_retries: usize) -> Self {
        let config = RetryConfig {
            max_attempts: max_retries.max(1),
            ..RetryConfig::default()
        };
        Self::with_config(inner, config)
    }

    pub fn with_config(inner: T, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            use_jitter: false,
        }
    }

    pub fn with_jitter(inner: T, max_attempts: usize) -> Self {
        let mut storage = Self::new(inner, max_attempts);
        storage.use_jitter = true;
        storage
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn retry_with_backoff<F, Fut, R>(&self, mut operation: F) -> Result<R, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<R, StorageError>>,
    {
        let mut attempts = 0;
        let mut delay = self.config.initial_delay;

        loop {
            attempts += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if attempts >= self.config.max_attempts || !e.is_retryable() => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "storage operation failed, retrying");

                    let mut actual_delay = delay;
                    if self.use_jitter {
                        let jitter = Duration::from_millis(
                            (rand::random::<f64>() * delay.as_millis() as f64 * 0.3) as u64,
                        );
                        actual_delay = delay + jitter;
                    }

                    sleep(actual_delay).await;

                    let next_delay = Duration::from_millis(
                        (delay.as_millis() as f64 * self.config.exponential_base) as u64,
                    );
                    delay = next_delay.min(self.config.max_delay);
                }
            }
        }
    }
}

#[async_trait]
impl<T: ObjectStorage> ObjectStorage for RetryObjectStorage<T> {
    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        container: &str,
    ) -> Result<String, StorageError> {
        self.retry_with_backoff(|| {
            let inner = &self.inner;
            let data = data.clone();
            async move { inner.upload(data, key, container).await }
        })
        .await
    }

    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.retry_with_backoff(|| {
            let inner = &self.inner;
            async move { inner.download(key, container).await }
        })
        .await
    }

    fn public_url(&self, key: &str, container: &str) -> String {
        self.inner.public_url(key, container)
    }
}

// Mock object storage for testing
#[derive(Clone, Default)]
pub struct MockObjectStorage {
    data: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
    call_count: Arc<RwLock<HashMap<String, usize>>>,
    failing_prefix: Arc<RwLock<Option<String>>>,
}

impl MockObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upload whose key starts with `prefix` fail with a network error.
    pub async fn fail_uploads_with_prefix(&self, prefix: impl Into<String>) {
        *self.failing_prefix.write().await = Some(prefix.into());
    }

    pub async fn contains(&self, key: &str, container: &str) -> bool {
        self.data
            .read()
            .await
            .contains_key(&(container.to_string(), key.to_string()))
    }

    /// Keys stored in `container`, sorted.
    pub async fn keys(&self, container: &str) -> Vec<String> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of calls made for `op` ("upload" or "download").
    pub async fn calls(&self, op: &str) -> usize {
        self.call_count.read().await.get(op).copied().unwrap_or(0)
    }

    async fn record(&self, op: &str) {
        let mut counts = self.call_count.write().await;
        *counts.entry(op.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        container: &str,
    ) -> Result<String, StorageError> {
        self.record("upload").await;
        validate_key(key)?;

        if let Some(prefix) = self.failing_prefix.read().await.as_deref() {
            if key.starts_with(prefix) {
                return Err(StorageError::NetworkError(format!(
                    "Upload failed: {}",
                    key
                )));
            }
        }

        let mut storage = self.data.write().await;
        storage.insert((container.to_string(), key.to_string()), data);
        Ok(self.public_url(key, container))
    }

    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.record("download").await;
        let data = self.data.read().await;
        Ok(data.get(&(container.to_string(), key.to_string())).cloned())
    }

    fn public_url(&self, key: &str, container: &str) -> String {
        format!("mock://{}/{}", container, key)
    }
}
