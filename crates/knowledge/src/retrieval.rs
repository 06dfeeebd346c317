//! Retrieval facade for the reasoning layer.

use crate::config::RetrievalConfig;
use crate::coordinator::KnowledgeBase;
use crate::error::KnowledgeResult;
use crate::types::ContextChunk;
use std::sync::Arc;

/// Maximum characters of a chunk shown in a display snippet.
const SNIPPET_CHARS: usize = 160;

#[derive(Debug, Clone)]
pub struct Retriever {
    base: Arc<KnowledgeBase>,
    top_k: usize,
    min_score: Option<f32>,
}

impl Retriever {
    /// A retriever using the base's `retrieval` settings.
    pub fn new(base: Arc<KnowledgeBase>) -> Self {
        let RetrievalConfig { top_k, min_score } = base.config().retrieval.clone();
        Self {
            base,
            top_k,
            min_score,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The chunks most relevant to `query`, best first.
    ///
    /// Fails with `NotReady` while the knowledge base is empty.
    pub async fn search(&self, query: &str) -> KnowledgeResult<Vec<ContextChunk>> {
        let hits = self.base.search(query, self.top_k).await?;
        let retrieved = hits.len();

        let chunks: Vec<ContextChunk> = hits
            .into_iter()
            .filter(|hit| self.min_score.map_or(true, |min| hit.score >= min))
            .map(|hit| ContextChunk {
                document_name: hit.chunk.document,
                chunk_text: hit.chunk.text,
                position: hit.chunk.position,
                score: hit.score,
            })
            .collect();

        match (chunks.first(), chunks.last()) {
            (Some(best), Some(worst)) => tracing::info!(
                retrieved,
                kept = chunks.len(),
                top_score = best.score,
                lowest_score = worst.score,
                "Retrieved context chunks"
            ),
            _ => tracing::info!(retrieved, "No chunks passed the relevance cutoff"),
        }

        Ok(chunks)
    }
}

/// Render chunks as prompt context for a language model.
pub fn format_context(chunks: &[ContextChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Source {}: {}, part {}]\n{}",
                i + 1,
                chunk.document_name,
                chunk.position + 1,
                chunk.chunk_text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Shorten chunk text for display, breaking at a word boundary.
pub fn snippet(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }

    let truncated: String = text.chars().take(SNIPPET_CHARS).collect();
    match truncated.rfind(char::is_whitespace) {
        Some(last_space) => format!("{}...", &truncated[..last_space]),
        None => format!("{}...", truncated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_chunk(document: &str, position: u32, text: &str) -> ContextChunk {
        ContextChunk {
            document_name: document.to_string(),
            chunk_text: text.to_string(),
            position,
            score: 0.5,
        }
    }

    #[test]
    fn test_format_context() {
        let context = format_context(&[
            context_chunk("manual.pdf", 0, "First chunk"),
            context_chunk("notes.txt", 3, "Second chunk\n"),
        ]);
        assert_eq!(
            context,
            "[Source 1: manual.pdf, part 1]\nFirst chunk\n\n---\n\n[Source 2: notes.txt, part 4]\nSecond chunk"
        );
    }

    #[test]
    fn test_format_context_empty() {
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("  short text "), "short text");

        let long = "word ".repeat(100);
        let result = snippet(&long);
        assert!(result.ends_with("..."));
        assert!(result.chars().count() <= SNIPPET_CHARS + 3);
    }
}
