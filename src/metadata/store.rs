// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::types::{Event, NewPhoto, Photo};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Event already exists: {0}")]
    EventExists(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),
}

impl From<sqlx::Error> for MetadataError {
    fn from(e: sqlx::Error) -> Self {
        MetadataError::Database(e.to_string())
    }
}

/// Outcome of [`MetadataStore::insert_photo_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoInsert {
    Created(Photo),
    /// A photo with the same content hash already exists.
    Duplicate { existing_id: i64 },
}

/// Relational store for events and photos.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>, MetadataError>;

    /// Fails with [`MetadataError::EventExists`] if the slug is taken.
    async fn create_event(&self, slug: &str, name: &str) -> Result<Event, MetadataError>;

    async fn find_photo_by_hash(&self, file_hash: &str) -> Result<Option<Photo>, MetadataError>;

    /// Inserts the photo unless its hash is already recorded, atomically.
    async fn insert_photo_if_absent(&self, photo: NewPhoto) -> Result<PhotoInsert, MetadataError>;

    /// Looks up many photos at once. Unknown ids are absent from the map.
    async fn find_photos_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Photo>, MetadataError>;

    async fn get_or_create_event(&self, slug: &str, name: &str) -> Result<Event, MetadataError> {
        if let Some(event) = self.find_event_by_slug(slug).await? {
            return Ok(event);
        }
        match self.create_event(slug, name).await {
            Ok(event) => Ok(event),
            // Lost a race with another creator
            Err(MetadataError::EventExists(_)) => self
                .find_event_by_slug(slug)
                .await?
                .ok_or_else(|| MetadataError::EventNotFound(slug.to_string())),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>, MetadataError> {
        (**self).find_event_by_slug(slug).await
    }

    async fn create_event(&self, slug: &str, name: &str) -> Result<Event, MetadataError> {
        (**self).create_event(slug, name).await
    }

    async fn find_photo_by_hash(&self, file_hash: &str) -> Result<Option<Photo>, MetadataError> {
        (**self).find_photo_by_hash(file_hash).await
    }

    async fn insert_photo_if_absent(&self, photo: NewPhoto) -> Result<PhotoInsert, MetadataError> {
        (**self).insert_photo_if_absent(photo).await
    }

    async fn find_photos_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Photo>, MetadataError> {
        (**self).find_photos_by_ids(ids).await
    }
}

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    photos: HashMap<i64, Photo>,
    by_hash: HashMap<String, i64>,
    next_event_id: i64,
    next_photo_id: i64,
}

/// Process-local store for tests and single-run tooling.
#[derive(Clone, Default)]
pub struct InMemoryMetadataStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn photo_count(&self) -> usize {
        self.state.read().await.photos.len()
    }

    pub async fn photos(&self) -> Vec<Photo> {
        let state = self.state.read().await;
        let mut photos: Vec<Photo> = state.photos.values().cloned().collect();
        photos.sort_by_key(|p| p.id);
        photos
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>, MetadataError> {
        let state = self.state.read().await;
        Ok(state.events.iter().find(|e| e.slug == slug).cloned())
    }

    async fn create_event(&self, slug: &str, name: &str) -> Result<Event, MetadataError> {
        let mut state = self.state.write().await;
        if state.events.iter().any(|e| e.slug == slug) {
            return Err(MetadataError::EventExists(slug.to_string()));
        }
        state.next_event_id += 1;
        let event = Event {
            id: state.next_event_id,
            slug: slug.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn find_photo_by_hash(&self, file_hash: &str) -> Result<Option<Photo>, MetadataError> {
        let state = self.state.read().await;
        Ok(state
            .by_hash
            .get(file_hash)
            .and_then(|id| state.photos.get(id))
            .cloned())
    }

    async fn insert_photo_if_absent(&self, photo: NewPhoto) -> Result<PhotoInsert, MetadataError> {
        let mut state = self.state.write().await;
        if let Some(&existing_id) = state.by_hash.get(&photo.file_hash) {
            return Ok(PhotoInsert::Duplicate { existing_id });
        }
        state.next_photo_id += 1;
        let record = Photo {
            id: state.next_photo_id,
            event_id: photo.event_id,
            uri: photo.uri,
            thumb_uri: photo.thumb_uri,
            embedding_path: photo.embedding_path,
            file_hash: photo.file_hash,
            created_at: Utc::now(),
        };
        state.by_hash.insert(record.file_hash.clone(), record.id);
        state.photos.insert(record.id, record.clone());
        Ok(PhotoInsert::Created(record))
    }

    async fn find_photos_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Photo>, MetadataError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.photos.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}
