//! Document knowledge base.
//!
//! Ingests pdf, docx and txt files (with OCR for scanned pages and embedded
//! images), chunks them adaptively, embeds the chunks into a vector index and
//! keeps that index, its on-disk snapshot and the readiness state consistent.
//! [`KnowledgeBase`] is the entry point; [`Retriever`] serves queries.

pub mod chunker;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod index;
pub mod ocr;
pub mod persistence;
pub mod progress;
pub mod retrieval;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

pub use chunker::{AdaptiveChunker, ChunkPlan};
pub use config::KnowledgeBaseConfig;
pub use coordinator::{KnowledgeBase, KnowledgeBaseInfo};
pub use error::{KnowledgeError, KnowledgeResult};
pub use persistence::{PersistenceManager, StorageInfo};
pub use progress::{ProgressEvent, ProgressReporter};
pub use retrieval::{format_context, Retriever};
pub use types::{
    ContextChunk, DocumentRecord, FailedFile, IngestReport, IngestRequest, IngestedDocument,
    KnowledgeBaseState, KnowledgeBaseStatus, SourceFile,
};
