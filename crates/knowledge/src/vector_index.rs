//! Vector index abstraction for knowledge chunks.
//!
//! Rows are kept in insertion order. Removing a document compacts the rows,
//! so after any mutation row `i` always resolves to a live chunk and search
//! ties are broken by row order.

use crate::embeddings::cosine_similarity;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::types::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A chunk found by similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    pub row: usize,
}

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync {
    /// Embedding width every row must have.
    fn dimensions(&self) -> usize;

    /// Number of rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a chunk with its embedding.
    fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> KnowledgeResult<()>;

    /// Drop every row of a document, returning how many were removed.
    fn remove_document(&mut self, document: &str) -> usize;

    /// The `top_k` rows most similar to the query, best first.
    fn search(&self, query: &[f32], top_k: usize) -> KnowledgeResult<Vec<SearchHit>>;

    /// Rows per document.
    fn document_chunk_counts(&self) -> BTreeMap<String, usize>;

    /// Remove all rows.
    fn reset(&mut self);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    document: String,
    position: u32,
    text: String,
    embedding: Vec<f32>,
}

/// Exact (brute force) cosine index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimensions: usize,
    /// Provider and model that produced the embeddings
    provider: String,
    model: String,
    rows: Vec<Row>,
}

impl FlatIndex {
    pub fn new(dimensions: usize, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            dimensions,
            provider: provider.into(),
            model: model.into(),
            rows: Vec::new(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chunks in row order.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        self.rows.iter().map(|row| Chunk {
            document: row.document.clone(),
            position: row.position,
            text: row.text.clone(),
        })
    }

    /// Check every row has the declared width. Used after deserialization.
    pub fn validate(&self) -> KnowledgeResult<()> {
        if let Some((i, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.embedding.len() != self.dimensions)
        {
            return Err(KnowledgeError::IndexCorruption(format!(
                "row {} has {} dimensions, index declares {}",
                i,
                row.embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> KnowledgeResult<()> {
        if embedding.len() != self.dimensions {
            return Err(KnowledgeError::Embedding(format!(
                "embedding for {}#{} has {} dimensions, index expects {}",
                chunk.document,
                chunk.position,
                embedding.len(),
                self.dimensions
            )));
        }

        self.rows.push(Row {
            document: chunk.document,
            position: chunk.position,
            text: chunk.text,
            embedding,
        });
        Ok(())
    }

    fn remove_document(&mut self, document: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.document != document);
        before - self.rows.len()
    }

    fn search(&self, query: &[f32], top_k: usize) -> KnowledgeResult<Vec<SearchHit>> {
        if query.len() != self.dimensions {
            return Err(KnowledgeError::Embedding(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let score = cosine_similarity(query, &row.embedding);
                (i, if score.is_nan() { f32::MIN } else { score })
            })
            .collect();

        // Stable sort keeps row order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let row = &self.rows[i];
                SearchHit {
                    chunk: Chunk {
                        document: row.document.clone(),
                        position: row.position,
                        text: row.text.clone(),
                    },
                    score,
                    row: i,
                }
            })
            .collect())
    }

    fn document_chunk_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.document.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn reset(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document: &str, position: u32) -> Chunk {
        Chunk {
            document: document.to_string(),
            position,
            text: format!("{} chunk {}", document, position),
        }
    }

    fn index_with(rows: &[(&str, u32, [f32; 2])]) -> FlatIndex {
        let mut index = FlatIndex::new(2, "test", "test");
        for (doc, pos, v) in rows {
            index.insert(chunk(doc, *pos), v.to_vec()).unwrap();
        }
        index
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = index_with(&[
            ("a.txt", 0, [1.0, 0.0]),
            ("b.txt", 0, [0.0, 1.0]),
            ("c.txt", 0, [0.7, 0.7]),
        ]);

        let hits = index.search(&[0.0, 1.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document, "b.txt");
        assert_eq!(hits[1].chunk.document, "c.txt");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_keep_row_order() {
        let index = index_with(&[
            ("a.txt", 0, [1.0, 0.0]),
            ("a.txt", 1, [1.0, 0.0]),
            ("b.txt", 0, [1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_compacts_rows() {
        let mut index = index_with(&[
            ("a.txt", 0, [1.0, 0.0]),
            ("b.txt", 0, [0.0, 1.0]),
            ("a.txt", 1, [1.0, 0.1]),
            ("c.txt", 0, [0.5, 0.5]),
        ]);

        assert_eq!(index.remove_document("a.txt"), 2);
        assert_eq!(index.len(), 2);

        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.document != "a.txt"));
        assert!(hits.iter().all(|h| h.row < index.len()));
    }

    #[test]
    fn test_remove_unknown_document_is_noop() {
        let mut index = index_with(&[("a.txt", 0, [1.0, 0.0])]);
        assert_eq!(index.remove_document("missing.txt"), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = FlatIndex::new(3, "test", "test");
        let err = index.insert(chunk("a.txt", 0), vec![1.0]).unwrap_err();
        assert!(matches!(err, KnowledgeError::Embedding(_)));
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_document_chunk_counts() {
        let index = index_with(&[
            ("a.txt", 0, [1.0, 0.0]),
            ("b.txt", 0, [0.0, 1.0]),
            ("a.txt", 1, [1.0, 0.1]),
        ]);
        let counts = index.document_chunk_counts();
        assert_eq!(counts.get("a.txt"), Some(&2));
        assert_eq!(counts.get("b.txt"), Some(&1));
    }

    #[test]
    fn test_validate_detects_bad_row() {
        let json = r#"{"dimensions":2,"provider":"t","model":"t","rows":[{"document":"a","position":0,"text":"x","embedding":[1.0]}]}"#;
        let index: FlatIndex = serde_json::from_str(json).unwrap();
        assert!(matches!(
            index.validate(),
            Err(KnowledgeError::IndexCorruption(_))
        ));
    }
}
