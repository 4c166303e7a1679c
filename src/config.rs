// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::core::types::{Metric, FACE_DIMENSION};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Blobs live under a local directory.
    Local,
    /// Blobs live behind a REST blob service.
    Http,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub mode: StorageMode,
    /// Root directory for `Local`, service endpoint for `Http`.
    pub base_url: Option<String>,
    /// Prefix used when building public photo URIs, if different from `base_url`.
    pub public_url: Option<String>,
    pub sas_token: Option<String>,
    pub photo_container: String,
    pub index_container: String,
    pub retry_attempts: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Face engine endpoints, tried in order.
    pub face_engine_urls: Vec<String>,
    pub whole_image_url: Option<String>,
    pub timeout_ms: u64,
}

/// HTTP listener settings for the search server.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: IpAddr,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub event_slug: String,
    pub media_root: PathBuf,
    pub database_url: String,
    pub metric: Metric,
    pub dimension: usize,
    pub match_threshold: f32,
    pub top_k: usize,
    pub max_upload_mb: usize,
    pub storage: StorageSettings,
    pub engines: EngineSettings,
    pub api: ApiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_slug: "default-event".to_string(),
            media_root: PathBuf::from("/tmp/media"),
            database_url: "sqlite://./data.db?mode=rwc".to_string(),
            metric: Metric::Cosine,
            dimension: FACE_DIMENSION,
            match_threshold: 0.45,
            top_k: 50,
            max_upload_mb: 8,
            storage: StorageSettings {
                mode: StorageMode::Local,
                base_url: None,
                public_url: None,
                sas_token: None,
                photo_container: "photos".to_string(),
                index_container: "indexes".to_string(),
                retry_attempts: 3,
                timeout_ms: 300_000,
            },
            engines: EngineSettings {
                face_engine_urls: Vec::new(),
                whole_image_url: None,
                timeout_ms: 30_000,
            },
            api: ApiSettings {
                host: IpAddr::from([0, 0, 0, 0]),
                port: 8000,
                cors_origins: vec![
                    "http://localhost:5173".to_string(),
                    "http://localhost:3000".to_string(),
                    "http://localhost:8080".to_string(),
                ],
            },
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_mode = match get("STORAGE_MODE").as_deref() {
            None | Some("local") => StorageMode::Local,
            Some("http") => StorageMode::Http,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_MODE",
                    value: other.to_string(),
                    reason: "expected \"local\" or \"http\"".to_string(),
                })
            }
        };

        let storage_base = get("STORAGE_BASE_URL");
        if storage_mode == StorageMode::Http {
            let url = storage_base
                .as_deref()
                .ok_or(ConfigError::Missing("STORAGE_BASE_URL"))?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_BASE_URL",
                    value: url.to_string(),
                    reason: "must start with http:// or https://".to_string(),
                });
            }
        }

        let match_threshold = parse_or(&get, "MATCH_THRESHOLD", defaults.match_threshold)?;
        if !(-1.0..=1.0).contains(&match_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "MATCH_THRESHOLD",
                value: match_threshold.to_string(),
                reason: "must be within [-1, 1]".to_string(),
            });
        }

        let top_k: usize = parse_or(&get, "TOP_K", defaults.top_k)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TOP_K",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            event_slug: get("EVENT_SLUG").unwrap_or(defaults.event_slug),
            media_root: get("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            metric: parse_or(&get, "FACE_METRIC", defaults.metric)?,
            dimension: defaults.dimension,
            match_threshold,
            top_k,
            max_upload_mb: parse_or(&get, "MAX_UPLOAD_MB", defaults.max_upload_mb)?,
            storage: StorageSettings {
                mode: storage_mode,
                base_url: storage_base,
                public_url: get("STORAGE_PUBLIC_URL"),
                sas_token: get("STORAGE_SAS_TOKEN"),
                photo_container: get("PHOTO_CONTAINER")
                    .unwrap_or(defaults.storage.photo_container),
                index_container: get("INDEX_CONTAINER")
                    .unwrap_or(defaults.storage.index_container),
                retry_attempts: parse_or(
                    &get,
                    "STORAGE_RETRY_ATTEMPTS",
                    defaults.storage.retry_attempts,
                )?,
                timeout_ms: parse_or(&get, "STORAGE_TIMEOUT_MS", defaults.storage.timeout_ms)?,
            },
            engines: EngineSettings {
                face_engine_urls: get("FACE_ENGINE_URLS")
                    .map(|urls| split_list(&urls))
                    .unwrap_or_default(),
                whole_image_url: get("WHOLE_IMAGE_ENGINE_URL"),
                timeout_ms: parse_or(&get, "FACE_ENGINE_TIMEOUT_MS", defaults.engines.timeout_ms)?,
            },
            api: ApiSettings {
                host: parse_or(&get, "API_HOST", defaults.api.host)?,
                port: parse_or(&get, "API_PORT", defaults.api.port)?,
                cors_origins: get("CORS_ORIGINS")
                    .map(|origins| split_list(&origins))
                    .unwrap_or(defaults.api.cors_origins),
            },
        })
    }

    pub fn index_dir(&self) -> PathBuf {
        self.media_root.join("indices")
    }

    pub fn embeddings_dir(&self) -> PathBuf {
        self.media_root.join("embeddings")
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
