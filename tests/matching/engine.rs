// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::common::*;
use approx::assert_relative_eq;
use photo_match::core::types::{Metric, NewPhoto};
use photo_match::embedding::StaticFaceEngine;
use photo_match::index::IndexedVectors;
use photo_match::matching::MatchNote;
use photo_match::metadata::{MetadataStore, PhotoInsert};

/// Blends two axes so the cosine with `axis(a)` is exactly `weight_a / norm`.
fn blend(a: usize, weight_a: f32, b: usize, weight_b: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[a] = weight_a;
    v[b] = weight_b;
    v
}

#[cfg(test)]
mod match_tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_query_is_no_face_without_loading() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let outcome = h.matcher(0.45).search(&vec![0.0; DIM], "gala").await.unwrap();

        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.note, Some(MatchNote::NoFace));
        assert_eq!(h.storage.calls("download").await, 0);
        assert!(!h.index_store.paths("gala").index.exists());
    }

    #[tokio::test]
    async fn test_empty_index_is_not_ready() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let outcome = h.matcher(0.45).search(&axis(0), "gala").await.unwrap();

        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.note, Some(MatchNote::IndexNotReady));
    }

    #[tokio::test]
    async fn test_ingested_photo_is_found_by_its_face() {
        let red = png([255, 0, 0]);
        let blue = png([0, 0, 255]);
        let engine = StaticFaceEngine::new("static")
            .with_faces(&red, vec![face(axis(0), 10, 10)])
            .with_faces(&blue, vec![face(axis(1), 10, 10)]);
        let h = Harness::new(engine);
        h.add_image("a/red.png", &red);
        h.add_image("a/blue.png", &blue);
        h.pipeline().run("gala", h.photos_dir.path()).await.unwrap();

        // A selfie with the same bytes yields the same face
        let outcome = h.matcher(0.45).search_image(&red, "gala").await.unwrap();
        assert_eq!(outcome.note, None);
        assert_eq!(outcome.matches.len(), 1);

        let red_photo = h
            .metadata
            .photos()
            .await
            .into_iter()
            .find(|p| p.uri == outcome.matches[0].url)
            .unwrap();
        assert_eq!(outcome.matches[0].photo_id, red_photo.id);
        assert_eq!(outcome.matches[0].thumb, red_photo.thumb_uri);
        assert_relative_eq!(outcome.matches[0].score, 1.0, epsilon = 1e-5);
    }

    #[tokio::test]
    async fn test_threshold_drops_weak_matches() {
        let near = png([1, 0, 0]);
        let far = png([2, 0, 0]);
        let engine = StaticFaceEngine::new("static")
            // cos = 0.8 and 0.3 against axis(0)
            .with_faces(&near, vec![face(blend(0, 0.8, 1, 0.6), 10, 10)])
            .with_faces(&far, vec![face(blend(0, 0.3, 2, 0.9539392), 10, 10)]);
        let h = Harness::new(engine);
        h.add_image("a/near.png", &near);
        h.add_image("a/far.png", &far);
        h.pipeline().run("gala", h.photos_dir.path()).await.unwrap();

        let outcome = h.matcher(0.45).search(&axis(0), "gala").await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_relative_eq!(outcome.matches[0].score, 0.8, epsilon = 1e-4);

        let loose = h.matcher(0.1).search(&axis(0), "gala").await.unwrap();
        assert_eq!(loose.matches.len(), 2);
        assert!(loose.matches[0].score >= loose.matches[1].score);
    }

    #[tokio::test]
    async fn test_two_faces_one_photo_are_deduplicated() {
        let group = png([7, 7, 7]);
        let engine = StaticFaceEngine::new("static").with_faces(
            &group,
            vec![face(blend(0, 0.9, 1, 0.43588989), 10, 10), face(axis(0), 20, 20)],
        );
        let h = Harness::new(engine);
        h.add_image("party/group.png", &group);
        h.pipeline().run("gala", h.photos_dir.path()).await.unwrap();

        let outcome = h.matcher(0.45).search(&axis(0), "gala").await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        // First occurrence is the best face
        assert_relative_eq!(outcome.matches[0].score, 1.0, epsilon = 1e-5);
    }

    #[tokio::test]
    async fn test_l2_scores_and_ignores_threshold() {
        let h = Harness::with_metric(StaticFaceEngine::new("static"), Metric::L2);
        let event = h.metadata.get_or_create_event("gala", "gala").await.unwrap();
        let mut ids = Vec::new();
        for hash in ["p1", "p2"] {
            let inserted = h
                .metadata
                .insert_photo_if_absent(NewPhoto {
                    event_id: event.id,
                    uri: format!("mock://photos/{}.jpg", hash),
                    thumb_uri: format!("mock://photos/{}.jpg", hash),
                    embedding_path: String::new(),
                    file_hash: hash.to_string(),
                })
                .await
                .unwrap();
            if let PhotoInsert::Created(photo) = inserted {
                ids.push(photo.id);
            }
        }

        let mut index = IndexedVectors::new(DIM, Metric::L2);
        let mut far = vec![0.0; DIM];
        far[0] = 3.0;
        index.add(vec![far, axis(0)], &ids).unwrap();
        h.index_store.persist(&index, "gala").await.unwrap();

        // Threshold would reject everything if it applied under L2
        let outcome = h.matcher(0.99).search(&axis(0), "gala").await.unwrap();
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[0].photo_id, ids[1]);
        assert_relative_eq!(outcome.matches[0].score, 1.0, epsilon = 1e-6);
        // distance 4.0
        assert_relative_eq!(outcome.matches[1].score, 0.2, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn test_rows_without_metadata_are_dropped() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let mut index = IndexedVectors::new(DIM, Metric::Cosine);
        index.add(vec![axis(0)], &[4242]).unwrap();
        h.index_store.persist(&index, "gala").await.unwrap();

        let outcome = h.matcher(0.45).search(&axis(0), "gala").await.unwrap();
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.note, None);
    }

    #[tokio::test]
    async fn test_selfie_without_face_is_no_face() {
        let h = Harness::new(StaticFaceEngine::new("static"));
        let mut index = IndexedVectors::new(DIM, Metric::Cosine);
        index.add(vec![axis(0)], &[1]).unwrap();
        h.index_store.persist(&index, "gala").await.unwrap();

        let outcome = h.matcher(0.45).search_image(&png([3, 3, 3]), "gala").await.unwrap();
        assert_eq!(outcome.note, Some(MatchNote::NoFace));
    }

    #[tokio::test]
    async fn test_concurrent_searches_read_the_same_index() {
        let red = png([255, 0, 0]);
        let engine = StaticFaceEngine::new("static").with_faces(&red, vec![face(axis(0), 10, 10)]);
        let h = Harness::new(engine);
        h.add_image("a/red.png", &red);
        h.pipeline().run("gala", h.photos_dir.path()).await.unwrap();

        let matcher = h.matcher(0.45);
        let query = axis(0);
        let queries = (0..8).map(|_| matcher.search(&query, "gala"));
        let outcomes = futures::future::join_all(queries).await;

        for outcome in outcomes {
            let outcome = outcome.unwrap();
            assert_eq!(outcome.matches.len(), 1);
            assert_relative_eq!(outcome.matches[0].score, 1.0, epsilon = 1e-5);
        }
    }
}
