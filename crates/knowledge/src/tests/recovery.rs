//! Snapshot round trips, interrupted saves and corrupt snapshots.

use super::{open, open_with, persistence, prose, txt, DIMENSIONS};
use crate::config::ChunkSizing;
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ocr::testing::ScriptedEngine;
use crate::types::{IngestRequest, KnowledgeBaseState};
use crate::vector_index::VectorIndex;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

/// Trigram embeddings that fail for any text containing `poison`.
#[derive(Debug)]
struct PoisonedProvider {
    inner: TrigramProvider,
    poison: &'static str,
}

#[async_trait::async_trait]
impl EmbeddingProvider for PoisonedProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(self.poison)) {
            return Err(KnowledgeError::Embedding("model unavailable".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

fn snapshot_file(dir: &TempDir, file: &str) -> std::path::PathBuf {
    let current = fs::read_to_string(dir.path().join("snapshot/CURRENT")).unwrap();
    dir.path().join("snapshot").join(current.trim()).join(file)
}

#[tokio::test]
async fn test_reload_reconstructs_index() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    kb.create(IngestRequest::new(vec![
        txt("a.txt", &prose("hoist", 1200)),
        txt("b.txt", &prose("winch", 2600)),
    ]))
    .await
    .unwrap();
    let before = kb.status().await;
    let hits_before = kb.search("winch", 3).await.unwrap();

    let reopened = open(&dir);
    let status = reopened.load().await.unwrap();
    assert_eq!(status.state, KnowledgeBaseState::Ready);
    assert_eq!(status.chunk_count, before.chunk_count);
    assert_eq!(status.document_count, 2);

    for name in ["a.txt", "b.txt"] {
        assert_eq!(
            reopened.document(name).await.unwrap().chunk_count,
            kb.document(name).await.unwrap().chunk_count
        );
    }

    let hits_after = reopened.search("winch", 3).await.unwrap();
    assert_eq!(hits_before, hits_after);
}

#[tokio::test]
async fn test_failed_batch_leaves_state_and_snapshot() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(PoisonedProvider {
        inner: TrigramProvider::new(DIMENSIONS),
        poison: "meltdown",
    });
    let kb = open_with(&dir, ChunkSizing::Batch, provider, ScriptedEngine::new());
    kb.create(IngestRequest::new(vec![txt("a.txt", &prose("hoist", 800))]))
        .await
        .unwrap();
    let before = kb.status().await;
    let pointer_before = fs::read_to_string(dir.path().join("snapshot/CURRENT")).unwrap();

    let err = kb
        .add(IngestRequest::new(vec![
            txt("b.txt", &prose("winch", 800)),
            txt("c.txt", &prose("meltdown", 800)),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::Embedding(_)));

    let after = kb.status().await;
    assert_eq!(after.document_count, before.document_count);
    assert_eq!(after.chunk_count, before.chunk_count);
    assert_eq!(kb.document_names().await, vec!["a.txt"]);

    let pointer_after = fs::read_to_string(dir.path().join("snapshot/CURRENT")).unwrap();
    assert_eq!(pointer_before, pointer_after);
    assert_eq!(persistence(dir.path()).load().unwrap().index.len(), before.chunk_count);
}

#[tokio::test]
async fn test_interrupted_save_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    kb.create(IngestRequest::new(vec![txt("a.txt", &prose("hoist", 800))]))
        .await
        .unwrap();
    let rows = kb.status().await.chunk_count;

    // The process died after writing the next generation's index but before
    // the pointer moved
    let partial = dir.path().join("snapshot/gen-2");
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("index.json"), b"{\"dimensions\":256,\"rows\":[{").unwrap();

    let reopened = open(&dir);
    let status = reopened.load().await.unwrap();
    assert_eq!(status.state, KnowledgeBaseState::Ready);
    assert_eq!(status.chunk_count, rows);

    // Writing again moves past the abandoned generation
    reopened
        .add(IngestRequest::new(vec![txt("b.txt", &prose("winch", 800))]))
        .await
        .unwrap();
    assert!(!partial.exists());
    assert_eq!(reopened.info().await.unwrap().storage.generation, Some(3));
}

#[tokio::test]
async fn test_corrupt_index_is_rebuilt_from_stored_text() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    kb.create(IngestRequest::new(vec![
        txt("a.txt", &prose("hoist", 900)),
        txt("b.txt", &prose("winch", 900)),
    ]))
    .await
    .unwrap();

    fs::write(snapshot_file(&dir, "index.json"), b"not json").unwrap();

    let reopened = open(&dir);
    let status = reopened.load().await.unwrap();
    assert_eq!(status.state, KnowledgeBaseState::Ready);
    assert_eq!(status.document_count, 2);

    let hits = reopened.search("winch", 1).await.unwrap();
    assert_eq!(hits[0].chunk.document, "b.txt");

    // The rebuilt snapshot is valid on its own
    persistence(dir.path()).load().unwrap();
}

#[tokio::test]
async fn test_changed_embedding_model_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    kb.create(IngestRequest::new(vec![txt("a.txt", &prose("hoist", 900))]))
        .await
        .unwrap();

    let reopened = open_with(
        &dir,
        ChunkSizing::Batch,
        Arc::new(TrigramProvider::new(64)),
        ScriptedEngine::new(),
    );
    let status = reopened.load().await.unwrap();
    assert_eq!(status.state, KnowledgeBaseState::Ready);

    let snapshot = persistence(dir.path()).load().unwrap();
    assert_eq!(snapshot.index.dimensions(), 64);
}

#[tokio::test]
async fn test_unrecoverable_snapshot_stays_empty() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    kb.create(IngestRequest::new(vec![txt("a.txt", &prose("hoist", 900))]))
        .await
        .unwrap();

    fs::write(snapshot_file(&dir, "index.json"), b"garbage").unwrap();
    fs::write(snapshot_file(&dir, "metadata.json"), b"garbage").unwrap();

    let reopened = open(&dir);
    let err = reopened.load().await.unwrap_err();
    assert!(matches!(err, KnowledgeError::IndexCorruption(_)));
    assert_eq!(reopened.status().await.state, KnowledgeBaseState::Empty);
    assert!(matches!(
        reopened.search("hoist", 8).await,
        Err(KnowledgeError::NotReady)
    ));
}

#[tokio::test]
async fn test_missing_snapshot_loads_empty() {
    let dir = TempDir::new().unwrap();
    let kb = open(&dir);
    let status = kb.load().await.unwrap();
    assert_eq!(status.state, KnowledgeBaseState::Empty);
    assert_eq!(status.document_count, 0);
}
