//! Index lifecycle tests

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use beacon_rag::embedding::EmbeddingProvider;
use beacon_rag::index::{self, INDEX_FILE, IndexOrigin};
use beacon_rag::{Error, Result};
use common::{KeywordEmbedder, write_corpus};

/// Embedder with the wrong width for indexes built by [`KeywordEmbedder`]
struct NarrowEmbedder;

#[async_trait]
impl EmbeddingProvider for NarrowEmbedder {
    fn model_id(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

#[tokio::test]
async fn second_start_loads_without_reading_corpus() {
    let root = tempfile::tempdir().unwrap();
    let corpus = root.path().join("data");
    let storage = root.path().join("storage");
    write_corpus(&corpus);

    let first_embedder = Arc::new(KeywordEmbedder::default());
    let built = index::ensure_index(&corpus, &storage, first_embedder.clone())
        .await
        .unwrap();
    assert_eq!(built.origin(), IndexOrigin::Built);
    assert_eq!(built.meta().document_count, 3);
    assert!(first_embedder.calls() >= 1);
    let chunk_count = built.meta().chunk_count;
    drop(built);

    // Nothing left to read: a reload must not touch the corpus
    std::fs::remove_dir_all(&corpus).unwrap();

    let second_embedder = Arc::new(KeywordEmbedder::default());
    let loaded = index::ensure_index(&corpus, &storage, second_embedder.clone())
        .await
        .unwrap();
    assert_eq!(loaded.origin(), IndexOrigin::Loaded);
    assert_eq!(loaded.meta().chunk_count, chunk_count);
    assert_eq!(second_embedder.calls(), 0);

    // Queries still work and only embed the query itself
    let hits = loaded.retrieve("how do refunds work", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "billing.txt");
    assert_eq!(second_embedder.calls(), 1);
}

#[tokio::test]
async fn dimension_mismatch_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let corpus = root.path().join("data");
    let storage = root.path().join("storage");
    write_corpus(&corpus);

    index::ensure_index(&corpus, &storage, Arc::new(KeywordEmbedder::default()))
        .await
        .unwrap();

    let err = index::ensure_index(&corpus, &storage, Arc::new(NarrowEmbedder))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Index(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn empty_corpus_is_fatal_and_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let corpus = root.path().join("data");
    let storage = root.path().join("storage");
    std::fs::create_dir_all(&corpus).unwrap();
    std::fs::write(corpus.join("blank.md"), "   \n").unwrap();

    let err = index::ensure_index(&corpus, &storage, Arc::new(KeywordEmbedder::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Corpus(_)), "unexpected error: {err}");
    assert!(!storage.join(INDEX_FILE).exists());
}

#[tokio::test]
async fn missing_corpus_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let err = index::ensure_index(
        &root.path().join("nope"),
        &root.path().join("storage"),
        Arc::new(KeywordEmbedder::default()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Corpus(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn unreadable_index_file_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let storage = root.path().join("storage");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::write(storage.join(INDEX_FILE), b"definitely not sqlite").unwrap();

    let result = index::ensure_index(
        &root.path().join("data"),
        &storage,
        Arc::new(KeywordEmbedder::default()),
    )
    .await;
    assert!(result.is_err());
}
