//! Vector index manager: embeds chunks and maintains a [`FlatIndex`].
//!
//! The manager is cheap to clone (the provider is shared), which is how the
//! coordinator mutates a copy of the live index and only swaps it in once the
//! snapshot has been saved.

use crate::embeddings::EmbeddingProvider;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::progress::ProgressReporter;
use crate::types::Chunk;
use crate::vector_index::{FlatIndex, SearchHit, VectorIndex};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct IndexManager {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    index: Option<FlatIndex>,
    progress: ProgressReporter,
}

impl IndexManager {
    /// A manager with no index loaded.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            index: None,
            progress: ProgressReporter::noop(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    pub fn index(&self) -> Option<&FlatIndex> {
        self.index.as_ref()
    }

    pub fn row_count(&self) -> usize {
        self.index.as_ref().map(|i| i.len()).unwrap_or(0)
    }

    pub fn document_chunk_counts(&self) -> BTreeMap<String, usize> {
        self.index
            .as_ref()
            .map(|i| i.document_chunk_counts())
            .unwrap_or_default()
    }

    /// Adopt an index read from a snapshot.
    ///
    /// An index built by a different provider, model or width cannot be
    /// queried with this provider and is reported as corrupt.
    pub fn attach(&mut self, index: FlatIndex) -> KnowledgeResult<()> {
        index.validate()?;
        if index.dimensions() != self.provider.dimensions()
            || index.provider() != self.provider.provider_name()
            || index.model() != self.provider.model_name()
        {
            return Err(KnowledgeError::IndexCorruption(format!(
                "snapshot was built with {}/{} ({} dims), current provider is {}/{} ({} dims)",
                index.provider(),
                index.model(),
                index.dimensions(),
                self.provider.provider_name(),
                self.provider.model_name(),
                self.provider.dimensions()
            )));
        }
        self.index = Some(index);
        Ok(())
    }

    /// Drop the loaded index.
    pub fn unload(&mut self) {
        self.index = None;
    }

    /// Replace any loaded index with a fresh one built from `chunks`.
    pub async fn build(&mut self, chunks: Vec<Chunk>) -> KnowledgeResult<()> {
        if chunks.is_empty() {
            return Err(KnowledgeError::EmptyInput);
        }

        let mut index = FlatIndex::new(
            self.provider.dimensions(),
            self.provider.provider_name(),
            self.provider.model_name(),
        );
        self.embed_into(&mut index, chunks).await?;

        tracing::info!(rows = index.len(), "Built vector index");
        self.progress.index(index.len() as u64);
        self.index = Some(index);
        Ok(())
    }

    /// Append `chunks` to the loaded index (builds one if none is loaded).
    pub async fn add(&mut self, chunks: Vec<Chunk>) -> KnowledgeResult<()> {
        if chunks.is_empty() {
            return Err(KnowledgeError::EmptyInput);
        }

        let Some(current) = self.index.as_ref() else {
            return self.build(chunks).await;
        };

        // Embed into a copy so a failure leaves the loaded index as it was
        let mut next = current.clone();
        self.embed_into(&mut next, chunks).await?;

        tracing::info!(rows = next.len(), "Extended vector index");
        self.progress.index(next.len() as u64);
        self.index = Some(next);
        Ok(())
    }

    /// Remove every row of a document. Unknown documents are a no-op.
    pub fn remove(&mut self, document: &str) -> usize {
        let removed = self
            .index
            .as_mut()
            .map(|index| index.remove_document(document))
            .unwrap_or(0);

        if removed > 0 {
            tracing::info!(document, rows = removed, "Removed document rows from index");
        }
        removed
    }

    /// The `k` chunks nearest to `query`.
    pub async fn search(&self, query: &str, k: usize) -> KnowledgeResult<Vec<SearchHit>> {
        let index = self.index.as_ref().ok_or(KnowledgeError::NotReady)?;
        if k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.provider.embed(query).await?;
        index.search(&embedding, k)
    }

    async fn embed_into(&self, index: &mut FlatIndex, chunks: Vec<Chunk>) -> KnowledgeResult<()> {
        let total = chunks.len();
        let mut done = 0usize;
        let mut pending = chunks.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<Chunk> = pending.by_ref().take(self.batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.provider.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "provider returned {} embeddings for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }

            for (chunk, embedding) in batch.into_iter().zip(embeddings) {
                index.insert(chunk, embedding)?;
            }

            done += texts.len();
            self.progress
                .embed(done as u64, total as u64, self.provider.model_name());
        }

        Ok(())
    }
}
