// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::core::types::{Event, NewPhoto, Photo};
use crate::metadata::store::{MetadataError, MetadataStore, PhotoInsert};

/// SQLite bind-parameter headroom per `IN (...)` lookup.
const ID_CHUNK: usize = 500;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS photos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES events(id),
        uri TEXT NOT NULL,
        thumb_uri TEXT NOT NULL,
        embedding_path TEXT NOT NULL,
        file_hash TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_photos_event_id ON photos(event_id)",
];

const PHOTO_COLUMNS: &str = "id, event_id, uri, thumb_uri, embedding_path, file_hash, created_at";

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Opens (creating if needed) the database and bootstraps the schema.
    pub async fn connect(database_url: &str) -> Result<Self, MetadataError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.bootstrap().await?;
        info!(url = database_url, "metadata store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bootstrap(&self) -> Result<(), MetadataError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn event_from_row(row: &SqliteRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn photo_from_row(row: &SqliteRow) -> Result<Photo, sqlx::Error> {
    Ok(Photo {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        uri: row.try_get("uri")?,
        thumb_uri: row.try_get("thumb_uri")?,
        embedding_path: row.try_get("embedding_path")?,
        file_hash: row.try_get("file_hash")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>, MetadataError> {
        let row = sqlx::query("SELECT id, slug, name, created_at FROM events WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(event_from_row).transpose()?)
    }

    async fn create_event(&self, slug: &str, name: &str) -> Result<Event, MetadataError> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO events (slug, name, created_at) VALUES (?, ?, ?)")
            .bind(slug)
            .bind(name)
            .bind(created_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => {
                info!(slug, "created event");
                Ok(Event {
                    id: done.last_insert_rowid(),
                    slug: slug.to_string(),
                    name: name.to_string(),
                    created_at,
                })
            }
            Err(e) if is_unique_violation(&e) => Err(MetadataError::EventExists(slug.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_photo_by_hash(&self, file_hash: &str) -> Result<Option<Photo>, MetadataError> {
        let sql = format!("SELECT {} FROM photos WHERE file_hash = ?", PHOTO_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(photo_from_row).transpose()?)
    }

    async fn insert_photo_if_absent(&self, photo: NewPhoto) -> Result<PhotoInsert, MetadataError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM photos WHERE file_hash = ?")
            .bind(&photo.file_hash)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(existing_id) = existing {
            tx.rollback().await?;
            return Ok(PhotoInsert::Duplicate { existing_id });
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO photos (event_id, uri, thumb_uri, embedding_path, file_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(photo.event_id)
        .bind(&photo.uri)
        .bind(&photo.thumb_uri)
        .bind(&photo.embedding_path)
        .bind(&photo.file_hash)
        .bind(created_at)
        .execute(&mut *tx)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                let existing_id = self
                    .find_photo_by_hash(&photo.file_hash)
                    .await?
                    .map(|p| p.id)
                    .ok_or_else(|| MetadataError::Database("duplicate hash vanished".to_string()))?;
                return Ok(PhotoInsert::Duplicate { existing_id });
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        debug!(id, hash = %photo.file_hash, "inserted photo");
        Ok(PhotoInsert::Created(Photo {
            id,
            event_id: photo.event_id,
            uri: photo.uri,
            thumb_uri: photo.thumb_uri,
            embedding_path: photo.embedding_path,
            file_hash: photo.file_hash,
            created_at,
        }))
    }

    async fn find_photos_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Photo>, MetadataError> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT {} FROM photos WHERE id IN ({})", PHOTO_COLUMNS, placeholders);
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let photo = photo_from_row(&row)?;
                found.insert(photo.id, photo);
            }
        }
        Ok(found)
    }
}
