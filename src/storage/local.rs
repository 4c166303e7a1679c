// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::core::storage::{validate_key, ObjectStorage, StorageError};

/// Writes `data` to `path` by writing a sibling temp file and renaming it over
/// the target, so readers see either the old or the new contents.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Object storage backed by a directory tree: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    /// Serve public URIs from `base` instead of `file://` paths.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str, container: &str) -> Result<PathBuf, StorageError> {
        validate_key(container)?;
        validate_key(key)?;
        Ok(self.root.join(container).join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        container: &str,
    ) -> Result<String, StorageError> {
        let path = self.blob_path(key, container)?;
        write_atomic(&path, &data).await?;
        Ok(self.public_url(key, container))
    }

    async fn download(&self, key: &str, container: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(key, container)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str, container: &str) -> String {
        match &self.public_base {
            Some(base) => format!("{}/{}/{}", base, container, key),
            None => format!("file://{}", self.root.join(container).join(key).display()),
        }
    }
}
