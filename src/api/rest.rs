// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::context::EngineContext;
use crate::index::core::IndexError;
use crate::matching::engine::{MatchEngine, MatchError, MatchOutcome};

pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png"];
const ZIP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_size: 8 * 1024 * 1024, // 8MB
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<MatchEngine>,
    /// Event searched when a request names none.
    pub default_event: String,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(matcher: Arc<MatchEngine>, default_event: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(ZIP_FETCH_TIMEOUT).build()?;
        Ok(Self {
            matcher,
            default_event: default_event.into(),
            http,
        })
    }

    pub fn from_context(ctx: &EngineContext) -> anyhow::Result<Self> {
        Self::new(Arc::new(ctx.match_engine()), ctx.settings.event_slug.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadZipRequest {
    #[serde(default)]
    pub urls: Vec<String>,
}

// Error handling
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

impl From<MatchError> for ErrorResponse {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Index(IndexError::InvalidSlug(slug)) => {
                ErrorResponse::bad_request(format!("Invalid event: {}", slug))
            }
            other => {
                error!(error = %other, "search failed");
                ErrorResponse::new(format!("Search failed: {}", other))
            }
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

pub fn create_app(config: &ApiConfig, state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/search", post(search_handler))
        .route("/download_zip", post(download_zip_handler))
        // Middleware
        .layer(DefaultBodyLimit::max(config.max_request_size))
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn search_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MatchOutcome>, ErrorResponse> {
    let mut selfie: Option<Bytes> = None;
    let mut event: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ErrorResponse {
        error: format!("Invalid multipart body: {}", e.body_text()),
        status_code: e.status(),
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "selfie" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !ACCEPTED_CONTENT_TYPES.contains(&content_type.as_str()) {
                    return Err(ErrorResponse::bad_request("Unsupported file type".to_string()));
                }
                let bytes = field.bytes().await.map_err(|e| ErrorResponse {
                    error: format!("Could not read selfie: {}", e.body_text()),
                    status_code: e.status(),
                })?;
                selfie = Some(bytes);
            }
            "event" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ErrorResponse::bad_request(format!("Invalid event field: {}", e)))?;
                let text = text.trim().to_string();
                if !text.is_empty() {
                    event = Some(text);
                }
            }
            _ => {}
        }
    }

    let selfie = selfie.ok_or_else(|| ErrorResponse::bad_request("Missing selfie file".to_string()))?;
    let event = event.unwrap_or_else(|| state.default_event.clone());

    info!(event = %event, size = selfie.len(), "search request");
    let outcome = state.matcher.search_image(&selfie, &event).await?;
    Ok(Json(outcome))
}

async fn download_zip_handler(
    State(state): State<AppState>,
    Json(request): Json<DownloadZipRequest>,
) -> Result<Response, ErrorResponse> {
    if request.urls.is_empty() {
        return Err(ErrorResponse::bad_request("No photo URLs provided.".to_string()));
    }

    let mut entries = Vec::with_capacity(request.urls.len());
    for (i, url) in request.urls.iter().enumerate() {
        match fetch_photo(&state.http, url).await {
            Ok(bytes) => entries.push((format!("photo_{}{}", i + 1, extension_from_url(url)), bytes)),
            Err(reason) => warn!(url = %url, reason = %reason, "skipping photo in archive"),
        }
    }

    let archive = tokio::task::spawn_blocking(move || build_zip(entries))
        .await
        .map_err(|e| ErrorResponse::new(format!("Archive task failed: {}", e)))?
        .map_err(|e| ErrorResponse::new(format!("Failed to build archive: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=matched_photos.zip",
            ),
        ],
        archive,
    )
        .into_response())
}

async fn fetch_photo(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(format!("status {}", response.status()));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}

/// Extension of the URL path including the dot, `.jpg` when there is none.
pub fn extension_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
        })
        .unwrap_or_else(|| ".jpg".to_string())
}

pub fn build_zip(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&data)?;
    }
    Ok(writer.finish()?.into_inner())
}
