//! Adaptive chunking.
//!
//! Chunk size follows the scale of the text being ingested: small documents
//! get small chunks instead of being shredded into noise, large ones get
//! large chunks. Lengths are always effective lengths, so OCR markers never
//! make a short scan look like a long document.

use crate::config::{ChunkSizing, ChunkingConfig};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ocr::{effective_len, strip_ocr_markers};
use crate::types::{Chunk, FailedFile};
use serde::{Deserialize, Serialize};
use text_splitter::{ChunkConfig, TextSplitter};

const SMALL_AVERAGE_LIMIT: f64 = 500.0;
const MEDIUM_AVERAGE_LIMIT: f64 = 2000.0;
const MIN_SMALL_CHUNK: usize = 100;
const MAX_SMALL_OVERLAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkTier {
    Small,
    Medium,
    Large,
}

/// Chunk size and overlap (in characters) chosen for an average length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub avg_effective_len: f64,
    pub chunk_size: usize,
    pub overlap: usize,
    pub tier: ChunkTier,
}

impl ChunkPlan {
    pub fn for_average(avg: f64) -> Self {
        let (chunk_size, overlap, tier) = if avg < SMALL_AVERAGE_LIMIT {
            let size = MIN_SMALL_CHUNK.max((avg * 0.8).round() as usize);
            (size, MAX_SMALL_OVERLAP.min(size / 4), ChunkTier::Small)
        } else if avg < MEDIUM_AVERAGE_LIMIT {
            (500, 100, ChunkTier::Medium)
        } else {
            (1000, 200, ChunkTier::Large)
        };

        Self {
            avg_effective_len: avg,
            chunk_size,
            overlap,
            tier,
        }
    }

    /// Plan from effective lengths. An empty slice plans for an average of 0.
    pub fn for_lengths(lengths: &[usize]) -> Self {
        if lengths.is_empty() {
            return Self::for_average(0.0);
        }
        let total: usize = lengths.iter().sum();
        Self::for_average(total as f64 / lengths.len() as f64)
    }

    /// Plan for a set of texts, markers excluded.
    pub fn for_texts(texts: &[&str]) -> Self {
        let lengths: Vec<usize> = texts.iter().map(|t| effective_len(t)).collect();
        Self::for_lengths(&lengths)
    }
}

/// A document's chunks and the plan they were cut with.
#[derive(Debug, Clone)]
pub struct ChunkedDocument {
    pub name: String,
    pub plan: ChunkPlan,
    pub effective_chars: usize,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct ChunkedBatch {
    /// Documents that produced at least one chunk, in input order
    pub documents: Vec<ChunkedDocument>,
    /// Documents whose every chunk was discarded
    pub empty: Vec<FailedFile>,
    /// The shared plan, when sizing is per batch
    pub batch_plan: Option<ChunkPlan>,
}

impl ChunkedBatch {
    pub fn total_chunks(&self) -> usize {
        self.documents.iter().map(|d| d.chunks.len()).sum()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.documents.into_iter().flat_map(|d| d.chunks).collect()
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveChunker {
    sizing: ChunkSizing,
    min_chunk_chars: usize,
}

impl AdaptiveChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            sizing: config.sizing,
            min_chunk_chars: config.min_chunk_chars,
        }
    }

    /// Chunk `(name, text)` pairs.
    ///
    /// Fails with `NoMeaningfulContent` when the whole batch yields nothing.
    pub fn chunk_batch(&self, documents: &[(&str, &str)]) -> KnowledgeResult<ChunkedBatch> {
        let batch_plan = match self.sizing {
            ChunkSizing::Batch => {
                let texts: Vec<&str> = documents.iter().map(|(_, text)| *text).collect();
                Some(ChunkPlan::for_texts(&texts))
            }
            ChunkSizing::PerDocument => None,
        };

        if let Some(plan) = &batch_plan {
            tracing::info!(
                documents = documents.len(),
                avg_effective_len = plan.avg_effective_len,
                chunk_size = plan.chunk_size,
                overlap = plan.overlap,
                "Planned chunking for batch"
            );
        }

        let mut chunked = Vec::new();
        let mut empty = Vec::new();

        for (name, text) in documents {
            let plan = batch_plan.unwrap_or_else(|| ChunkPlan::for_texts(&[*text]));
            let pieces = self.split(text, &plan)?;

            if pieces.is_empty() {
                tracing::warn!(document = *name, "Every chunk was below the minimum length");
                empty.push(FailedFile::new(
                    *name,
                    KnowledgeError::EmptyDocument {
                        name: name.to_string(),
                        reason: format!(
                            "no chunk longer than {} characters",
                            self.min_chunk_chars
                        ),
                    },
                ));
                continue;
            }

            let chunks: Vec<Chunk> = pieces
                .into_iter()
                .enumerate()
                .map(|(position, text)| Chunk {
                    document: name.to_string(),
                    position: position as u32,
                    text,
                })
                .collect();

            tracing::debug!(
                document = *name,
                chunks = chunks.len(),
                chunk_size = plan.chunk_size,
                overlap = plan.overlap,
                "Chunked document"
            );

            chunked.push(ChunkedDocument {
                name: name.to_string(),
                plan,
                effective_chars: effective_len(text),
                chunks,
            });
        }

        if chunked.is_empty() {
            return Err(KnowledgeError::NoMeaningfulContent);
        }

        Ok(ChunkedBatch {
            documents: chunked,
            empty,
            batch_plan,
        })
    }

    /// Split effective text, dropping chunks at or below the minimum length.
    fn split(&self, text: &str, plan: &ChunkPlan) -> KnowledgeResult<Vec<String>> {
        let effective = strip_ocr_markers(text);
        let config = ChunkConfig::new(plan.chunk_size)
            .with_overlap(plan.overlap)
            .map_err(|e| KnowledgeError::Config(format!("Invalid chunk plan: {}", e)))?;
        let splitter = TextSplitter::new(config);

        Ok(splitter
            .chunks(&effective)
            .filter(|chunk| chunk.trim().chars().count() > self.min_chunk_chars)
            .map(|chunk| chunk.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::tag_ocr_text;

    fn chunker(sizing: ChunkSizing) -> AdaptiveChunker {
        AdaptiveChunker::new(&ChunkingConfig {
            sizing,
            ..Default::default()
        })
    }

    fn prose(chars: usize) -> String {
        let sentence = "The pump housing must be inspected every quarter. ";
        sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
    }

    #[test]
    fn test_plan_tiers() {
        let plan = ChunkPlan::for_average(300.0);
        assert_eq!((plan.chunk_size, plan.overlap, plan.tier), (240, 50, ChunkTier::Small));

        let plan = ChunkPlan::for_average(125.0);
        assert_eq!((plan.chunk_size, plan.overlap), (100, 25));

        let plan = ChunkPlan::for_average(500.0);
        assert_eq!((plan.chunk_size, plan.overlap, plan.tier), (500, 100, ChunkTier::Medium));

        let plan = ChunkPlan::for_average(1999.0);
        assert_eq!(plan.tier, ChunkTier::Medium);

        let plan = ChunkPlan::for_average(2000.0);
        assert_eq!((plan.chunk_size, plan.overlap, plan.tier), (1000, 200, ChunkTier::Large));
    }

    #[test]
    fn test_plan_from_batch_average() {
        let plan = ChunkPlan::for_lengths(&[200, 3000]);
        assert_eq!(plan.avg_effective_len, 1600.0);
        assert_eq!((plan.chunk_size, plan.overlap), (500, 100));
    }

    #[test]
    fn test_ocr_marker_not_counted() {
        let tagged = tag_ocr_text(&"a".repeat(40));
        let plan = ChunkPlan::for_texts(&[tagged.as_str()]);
        assert_eq!(plan.avg_effective_len, 40.0);
        assert_eq!(plan.tier, ChunkTier::Small);
        assert_eq!((plan.chunk_size, plan.overlap), (100, 25));
    }

    #[test]
    fn test_batch_sizing_shares_plan() {
        let small = prose(300);
        let large = prose(5000);
        let batch = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("small.txt", small.as_str()), ("large.txt", large.as_str())])
            .unwrap();

        let plan = batch.batch_plan.unwrap();
        assert_eq!(plan.avg_effective_len, 2650.0);
        assert_eq!(plan.chunk_size, 1000);
        for doc in &batch.documents {
            assert_eq!(doc.plan, plan);
            assert!(doc.chunks.iter().all(|c| c.text.chars().count() <= 1000));
        }
        assert_eq!(batch.documents[0].chunks.len(), 1);
    }

    #[test]
    fn test_per_document_sizing() {
        let small = prose(300);
        let large = prose(5000);
        let batch = chunker(ChunkSizing::PerDocument)
            .chunk_batch(&[("small.txt", small.as_str()), ("large.txt", large.as_str())])
            .unwrap();

        assert!(batch.batch_plan.is_none());
        assert_eq!(batch.documents[0].plan.chunk_size, 240);
        assert_eq!(batch.documents[1].plan.chunk_size, 1000);
        assert!(batch.documents[0].chunks.len() > 1);
    }

    #[test]
    fn test_positions_contiguous() {
        let text = prose(3000);
        let batch = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("doc.txt", text.as_str())])
            .unwrap();

        let positions: Vec<u32> = batch.documents[0].chunks.iter().map(|c| c.position).collect();
        let expected: Vec<u32> = (0..positions.len() as u32).collect();
        assert_eq!(positions, expected);
        assert!(positions.len() > 1);
    }

    #[test]
    fn test_markers_not_in_chunks() {
        let text = format!("{}\n\n{}", prose(120), tag_ocr_text("Scanned appendix with serial 4471"));
        let batch = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("mixed.pdf", text.as_str())])
            .unwrap();

        assert!(batch
            .into_chunks()
            .iter()
            .all(|c| !c.text.contains("Text extracted from images")));
    }

    #[test]
    fn test_tiny_document_reported_empty() {
        let large = prose(800);
        let batch = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("tiny.txt", "ok."), ("large.txt", large.as_str())])
            .unwrap();

        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].name, "large.txt");
        assert_eq!(batch.empty.len(), 1);
        assert_eq!(batch.empty[0].name, "tiny.txt");
    }

    #[test]
    fn test_no_meaningful_content() {
        let err = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("a.txt", "tiny"), ("b.txt", "   short   ")])
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::NoMeaningfulContent));
    }

    #[test]
    fn test_exactly_min_length_dropped() {
        // 10 characters is not more than the minimum
        let err = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("a.txt", "0123456789")])
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::NoMeaningfulContent));

        let batch = chunker(ChunkSizing::Batch)
            .chunk_batch(&[("a.txt", "0123456789A")])
            .unwrap();
        assert_eq!(batch.total_chunks(), 1);
    }
}
