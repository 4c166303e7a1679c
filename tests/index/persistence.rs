// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use photo_match::core::storage::{MockObjectStorage, ObjectStorage};
use photo_match::core::types::Metric;
use photo_match::index::persistence::{
    encode_artifacts, ids_file_name, index_file_name, IdsArtifact, IndexArtifact, ARTIFACT_VERSION,
};
use photo_match::index::{IndexError, IndexSource, IndexStore, IndexedVectors};
use std::sync::Arc;
use tempfile::TempDir;

const CONTAINER: &str = "indexes";

fn store(dir: &TempDir, remote: &MockObjectStorage) -> IndexStore {
    let remote: Arc<dyn ObjectStorage> = Arc::new(remote.clone());
    IndexStore::new(dir.path().join("indices"), remote, CONTAINER)
}

fn sample_index() -> IndexedVectors {
    let mut index = IndexedVectors::new(3, Metric::Cosine);
    index
        .add(vec![vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0]], &[7, 9])
        .unwrap();
    index
}

#[cfg(test)]
mod resolution_tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_index_when_nothing_exists() {
        let dir = TempDir::new().unwrap();
        let remote = MockObjectStorage::new();
        let store = store(&dir, &remote);

        let (index, source) = store.load_with_source("gala", 3, Metric::L2).await.unwrap();
        assert_eq!(source, IndexSource::Fresh);
        assert!(index.is_empty());
        assert_eq!(index.dimension(), 3);
        assert_eq!(index.metric(), Metric::L2);
        assert_eq!(remote.calls("download").await, 2);
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let remote = MockObjectStorage::new();
        let store = store(&dir, &remote);
        let original = sample_index();

        store.persist(&original, "gala").await.unwrap();
        let (loaded, source) = store.load_with_source("gala", 3, Metric::Cosine).await.unwrap();

        assert_eq!(source, IndexSource::LocalCache);
        assert_eq!(loaded, original);
        assert_eq!(loaded.ids().len(), loaded.count());
        assert_eq!(remote.calls("download").await, 0);
    }

    #[tokio::test]
    async fn test_remote_fallback_fills_cache() {
        let remote = MockObjectStorage::new();

        // Publish from one machine
        let publisher_dir = TempDir::new().unwrap();
        let publisher = store(&publisher_dir, &remote);
        publisher.persist(&sample_index(), "gala").await.unwrap();
        publisher.push("gala").await.unwrap();
        assert!(remote.contains(&index_file_name("gala"), CONTAINER).await);
        assert!(remote.contains(&ids_file_name("gala"), CONTAINER).await);

        // Load on another with a cold cache
        let reader_dir = TempDir::new().unwrap();
        let reader = store(&reader_dir, &remote);
        let (loaded, source) = reader.load_with_source("gala", 3, Metric::Cosine).await.unwrap();
        assert_eq!(source, IndexSource::Remote);
        assert_eq!(loaded.ids(), &[7, 9]);

        let paths = reader.paths("gala");
        assert!(paths.index.exists());
        assert!(paths.ids.exists());

        let (_, source) = reader.load_with_source("gala", 3, Metric::Cosine).await.unwrap();
        assert_eq!(source, IndexSource::LocalCache);
    }

    #[tokio::test]
    async fn test_one_sided_cache_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let remote = MockObjectStorage::new();
        let store = store(&dir, &remote);
        store.persist(&sample_index(), "gala").await.unwrap();
        std::fs::remove_file(store.paths("gala").ids).unwrap();

        let (index, source) = store.load_with_source("gala", 3, Metric::Cosine).await.unwrap();
        assert_eq!(source, IndexSource::Fresh);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        store.persist(&sample_index(), "gala").await.unwrap();

        let err = store.load("gala", 512, Metric::Cosine).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 512, actual: 3 }));
    }

    #[tokio::test]
    async fn test_stored_metric_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        store.persist(&sample_index(), "gala").await.unwrap();

        let loaded = store.load("gala", 3, Metric::L2).await.unwrap();
        assert_eq!(loaded.metric(), Metric::Cosine);
    }

    #[tokio::test]
    async fn test_invalid_slug_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        for slug in ["", "..", "a/b", "x y"] {
            assert!(matches!(
                store.load(slug, 3, Metric::Cosine).await,
                Err(IndexError::InvalidSlug(_))
            ));
        }
    }
}

#[cfg(test)]
mod corruption_tests {
    use super::*;

    #[tokio::test]
    async fn test_mismatched_generations_fail_after_retries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        let paths = store.paths("gala");

        let (index_a, _) = encode_artifacts(&sample_index()).unwrap();
        let (_, ids_b) = encode_artifacts(&sample_index()).unwrap();
        std::fs::create_dir_all(paths.index.parent().unwrap()).unwrap();
        std::fs::write(&paths.index, index_a).unwrap();
        std::fs::write(&paths.ids, ids_b).unwrap();

        let err = store.load("gala", 3, Metric::Cosine).await.unwrap_err();
        assert!(matches!(err, IndexError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_id_count_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        let paths = store.paths("gala");

        let index = IndexArtifact {
            version: ARTIFACT_VERSION,
            generation: "g1".to_string(),
            dimension: 2,
            metric: Metric::Cosine,
            count: 2,
            vectors: vec![1.0, 0.0, 0.0, 1.0],
        };
        let ids = IdsArtifact {
            version: ARTIFACT_VERSION,
            generation: "g1".to_string(),
            ids: vec![1],
        };
        std::fs::create_dir_all(paths.index.parent().unwrap()).unwrap();
        std::fs::write(&paths.index, serde_cbor::to_vec(&index).unwrap()).unwrap();
        std::fs::write(&paths.ids, serde_cbor::to_vec(&ids).unwrap()).unwrap();

        let err = store.load("gala", 2, Metric::Cosine).await.unwrap_err();
        assert!(matches!(err, IndexError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        let paths = store.paths("gala");

        let index = IndexArtifact {
            version: ARTIFACT_VERSION + 1,
            generation: "g".to_string(),
            dimension: 2,
            metric: Metric::L2,
            count: 0,
            vectors: Vec::new(),
        };
        let ids = IdsArtifact {
            version: ARTIFACT_VERSION + 1,
            generation: "g".to_string(),
            ids: Vec::new(),
        };
        std::fs::create_dir_all(paths.index.parent().unwrap()).unwrap();
        std::fs::write(&paths.index, serde_cbor::to_vec(&index).unwrap()).unwrap();
        std::fs::write(&paths.ids, serde_cbor::to_vec(&ids).unwrap()).unwrap();

        let err = store.load("gala", 2, Metric::L2).await.unwrap_err();
        assert!(matches!(err, IndexError::IncompatibleVersion { .. }));
    }

    #[tokio::test]
    async fn test_garbage_cache_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, &MockObjectStorage::new());
        let paths = store.paths("gala");
        std::fs::create_dir_all(paths.index.parent().unwrap()).unwrap();
        std::fs::write(&paths.index, b"not cbor at all").unwrap();
        std::fs::write(&paths.ids, b"nope").unwrap();

        assert!(matches!(
            store.load("gala", 3, Metric::Cosine).await,
            Err(IndexError::Corruption(_))
        ));
    }
}
