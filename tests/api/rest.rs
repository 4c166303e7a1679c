// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::common::*;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use photo_match::api::rest::{create_app, ApiConfig, AppState};
use photo_match::embedding::StaticFaceEngine;
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::sync::Arc;

fn server_for(h: &Harness, config: ApiConfig) -> TestServer {
    let state = AppState::new(Arc::new(h.matcher(0.45)), "gala").unwrap();
    TestServer::new(create_app(&config, state)).unwrap()
}

fn selfie(bytes: Vec<u8>, mime: &str) -> Part {
    Part::bytes(bytes).file_name("selfie").mime_type(mime)
}

#[cfg(test)]
mod api_setup_tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_cors_allow_list() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let config = ApiConfig {
            cors_origins: vec!["http://localhost:3000".to_string()],
            ..ApiConfig::default()
        };
        let server = server_for(&h, config);

        let allowed = server
            .get("/healthz")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("http://localhost:3000"),
            )
            .await;
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );

        let denied = server
            .get("/healthz")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("http://evil.example.com"),
            )
            .await;
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}

#[cfg(test)]
mod search_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_content_type_is_rejected() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());

        let form = MultipartForm::new().add_part("selfie", selfie(b"GIF89a".to_vec(), "image/gif"));
        let response = server.post("/api/search").multipart(form).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Unsupported file type");
        assert_eq!(h.storage.calls("download").await, 0);
    }

    #[tokio::test]
    async fn test_missing_selfie_is_rejected() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());

        let form = MultipartForm::new().add_text("event", "gala");
        let response = server.post("/api/search").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_face_note() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());

        let form = MultipartForm::new().add_part("selfie", selfie(png([9, 9, 9]), "image/png"));
        let response = server.post("/api/search").multipart(form).await;

        response.assert_status_ok();
        response.assert_json(&json!({
            "matches": [],
            "note": "No face detected in the selfie."
        }));
    }

    #[tokio::test]
    async fn test_empty_index_note() {
        let me = png([4, 5, 6]);
        let engine = StaticFaceEngine::new("static").with_faces(&me, vec![face(axis(0), 10, 10)]);
        let h = Harness::new(engine);
        let server = server_for(&h, ApiConfig::default());

        let form = MultipartForm::new().add_part("selfie", selfie(me, "image/png"));
        let response = server.post("/api/search").multipart(form).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["note"], "The photo index is empty. Please ingest photos first.");
    }

    #[tokio::test]
    async fn test_search_uses_requested_event() {
        let me = png([200, 100, 50]);
        let engine = StaticFaceEngine::new("static").with_faces(&me, vec![face(axis(0), 10, 10)]);
        let h = Harness::new(engine);
        h.add_image("a/me.png", &me);
        h.pipeline().run("concert", h.photos_dir.path()).await.unwrap();
        let server = server_for(&h, ApiConfig::default());

        // Default event has nothing ingested
        let form = MultipartForm::new().add_part("selfie", selfie(me.clone(), "image/png"));
        let body: Value = server.post("/api/search").multipart(form).await.json();
        assert_eq!(body["matches"].as_array().unwrap().len(), 0);

        let form = MultipartForm::new()
            .add_text("event", "concert")
            .add_part("selfie", selfie(me, "image/png"));
        let response = server.post("/api/search").multipart(form).await;
        response.assert_status_ok();
        let body: Value = response.json();
        let matches = body["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0]["url"].as_str().unwrap().starts_with("mock://photos/a/"));
        assert!(body.get("note").is_none());
    }

    #[tokio::test]
    async fn test_invalid_event_is_bad_request() {
        let me = png([1, 100, 50]);
        let engine = StaticFaceEngine::new("static").with_faces(&me, vec![face(axis(0), 10, 10)]);
        let h = Harness::new(engine);
        let server = server_for(&h, ApiConfig::default());

        let form = MultipartForm::new()
            .add_text("event", "../etc")
            .add_part("selfie", selfie(me, "image/png"));
        let response = server.post("/api/search").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let config = ApiConfig {
            max_request_size: 1024,
            ..ApiConfig::default()
        };
        let server = server_for(&h, config);

        let form = MultipartForm::new().add_part("selfie", selfie(vec![0u8; 64 * 1024], "image/png"));
        let response = server.post("/api/search").multipart(form).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }
}

#[cfg(test)]
mod download_zip_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_url_list_is_rejected() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());

        let response = server.post("/download_zip").json(&json!({ "urls": [] })).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "No photo URLs provided.");
    }

    #[tokio::test]
    async fn test_zip_contains_fetched_photos_and_skips_failures() {
        let mut remote = mockito::Server::new_async().await;
        let first = remote
            .mock("GET", "/photos/a.png")
            .with_status(200)
            .with_body("first")
            .create_async()
            .await;
        let missing = remote
            .mock("GET", "/photos/missing.jpg")
            .with_status(404)
            .create_async()
            .await;
        let third = remote
            .mock("GET", "/photos/c")
            .with_status(200)
            .with_body("third")
            .create_async()
            .await;

        let h = Harness::new(StaticFaceEngine::new("static"));
        let server = server_for(&h, ApiConfig::default());
        let urls = vec![
            format!("{}/photos/a.png", remote.url()),
            format!("{}/photos/missing.jpg", remote.url()),
            format!("{}/photos/c", remote.url()),
        ];

        let response = server.post("/download_zip").json(&json!({ "urls": urls })).await;
        response.assert_status_ok();
        assert_eq!(response.header("content-type"), "application/zip");
        assert_eq!(
            response.header("content-disposition"),
            "attachment; filename=matched_photos.zip"
        );

        let mut archive = zip::ZipArchive::new(Cursor::new(response.as_bytes().to_vec())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["photo_1.png", "photo_3.jpg"]);

        let mut content = String::new();
        archive
            .by_name("photo_3.jpg")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "third");

        first.assert_async().await;
        missing.assert_async().await;
        third.assert_async().await;
    }
}
