//! Knowledge base error taxonomy.
//!
//! Content-quality failures (`EmptyDocument`, `NoMeaningfulContent`) are
//! recoverable by excluding the offending file. `NoSnapshot` is the expected
//! first-run state, not a failure. `IndexCorruption` means the on-disk
//! snapshot must be treated as absent.

use docsage_core::AppError;
use thiserror::Error;

/// Errors produced by the ingestion, persistence and retrieval pipeline.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// File extension is not one of pdf, docx, txt
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// No text, tables or usable OCR output could be produced
    #[error("document '{name}' has no readable content: {reason}")]
    EmptyDocument { name: String, reason: String },

    /// Chunking discarded every segment of the batch
    #[error("no meaningful content chunks could be created from the documents")]
    NoMeaningfulContent,

    /// Every file of a batch failed
    #[error("no documents could be processed ({} failed)", failed.len())]
    NoDocumentsProcessed { failed: Vec<crate::types::FailedFile> },

    /// No snapshot exists on disk
    #[error("no knowledge base snapshot found")]
    NoSnapshot,

    /// The snapshot exists but is unreadable or inconsistent
    #[error("knowledge base snapshot is corrupt: {0}")]
    IndexCorruption(String),

    /// Retrieval or `add` attempted while the knowledge base is empty
    #[error("knowledge base is not ready; create it or add documents first")]
    NotReady,

    /// `build`/`add` called with zero chunks
    #[error("cannot build or extend an index from zero chunks")]
    EmptyInput,

    /// A document with the same name is already present
    #[error("document '{0}' already exists in the knowledge base")]
    DuplicateDocument(String),

    #[error("document '{0}' not found in the knowledge base")]
    DocumentNotFound(String),

    /// A source path could not be read from disk
    #[error("cannot read '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Structural parse failure of a PDF/DOCX container
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KnowledgeError {
    /// Whether the error only excludes a single file from a batch.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            KnowledgeError::UnsupportedFormat(_)
                | KnowledgeError::EmptyDocument { .. }
                | KnowledgeError::DuplicateDocument(_)
                | KnowledgeError::Unreadable { .. }
                | KnowledgeError::Extraction(_)
                | KnowledgeError::Ocr(_)
        )
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(err: serde_json::Error) -> Self {
        KnowledgeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for KnowledgeError {
    fn from(err: serde_yaml::Error) -> Self {
        KnowledgeError::Serialization(err.to_string())
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::Io(e) => AppError::Io(e),
            KnowledgeError::Config(msg) => AppError::Config(msg),
            KnowledgeError::Embedding(msg) => AppError::Embedding(msg),
            KnowledgeError::Serialization(msg) => AppError::Serialization(msg),
            other => AppError::Knowledge(other.to_string()),
        }
    }
}

/// Convenience type alias for Results with KnowledgeError.
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
