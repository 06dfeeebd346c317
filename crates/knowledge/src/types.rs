//! Knowledge system type definitions.
//!
//! `IngestRequest` and `IngestReport` are the only shapes ingestion callers
//! exchange with the coordinator.

use crate::chunker::ChunkPlan;
use crate::error::{KnowledgeError, KnowledgeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declared document format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_name(name: &str) -> KnowledgeResult<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            "" => Err(KnowledgeError::UnsupportedFormat(format!(
                "'{}' has no file extension",
                name
            ))),
            other => Err(KnowledgeError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }
}

/// A file handed to the knowledge base: its original name and raw bytes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, keeping only its file name as identity.
    pub fn from_path(path: &Path) -> KnowledgeResult<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                KnowledgeError::Extraction(format!("{:?} has no usable file name", path))
            })?
            .to_string();
        let bytes = std::fs::read(path).map_err(|source| KnowledgeError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { name, bytes })
    }
}

/// Request for `create` and `add`.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub files: Vec<SourceFile>,

    /// Paths that could not be read; reported as failed with the batch
    pub unreadable: Vec<FailedFile>,
}

impl IngestRequest {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self {
            files,
            unreadable: Vec::new(),
        }
    }

    /// Build a request from paths on disk. A path that cannot be read is
    /// recorded in `unreadable` and the remaining files still go through.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut request = Self::default();
        for path in paths.iter().map(AsRef::as_ref) {
            match SourceFile::from_path(path) {
                Ok(file) => request.files.push(file),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable file: {}", e);
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    request.unreadable.push(FailedFile::new(name, e));
                }
            }
        }
        request
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Outcome recorded for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentStatus {
    Succeeded,
    Failed { reason: String },
}

/// A document that lives in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Original file name; unique within a knowledge base
    pub name: String,

    pub format: DocumentFormat,

    /// Extracted text, OCR blocks included with their markers
    pub raw_text: String,

    /// Number of chunks (index rows) owned by this document
    pub chunk_count: usize,

    pub status: DocumentStatus,

    pub ingested_at: DateTime<Utc>,

    /// Size of the uploaded file
    pub size_bytes: u64,

    /// SHA-256 of the raw text
    pub content_hash: String,

    #[serde(default)]
    pub images_found: usize,

    #[serde(default)]
    pub images_recognized: usize,
}

impl DocumentRecord {
    /// Ordered chunk identifiers (`<name>#<position>`).
    pub fn chunk_ids(&self) -> Vec<String> {
        (0..self.chunk_count)
            .map(|position| chunk_id(&self.name, position as u32))
            .collect()
    }
}

/// Identifier of a chunk: stable for a given document and position.
pub fn chunk_id(document: &str, position: u32) -> String {
    format!("{}#{}", document, position)
}

/// A contiguous text segment of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Source document name
    pub document: String,

    /// Position within the document (0-indexed, contiguous)
    pub position: u32,

    pub text: String,
}

/// A file excluded from a batch, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub name: String,
    pub reason: String,
}

impl FailedFile {
    pub fn new(name: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// A document committed by an ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub name: String,
    pub format: DocumentFormat,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub overlap: usize,
    /// Effective characters (OCR markers excluded)
    pub effective_chars: usize,
    pub images_found: usize,
    pub images_recognized: usize,
}

/// Result of `create` and `add`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub succeeded: Vec<IngestedDocument>,
    pub failed: Vec<FailedFile>,
    /// Shared plan of the batch; `None` with per-document sizing
    pub chunk_plan: Option<ChunkPlan>,
    /// Chunks added to the index by this batch
    pub chunks_added: usize,
    /// Index rows after the batch was committed
    pub total_chunks: usize,
    pub duration_secs: f64,
}

impl IngestReport {
    pub fn succeeded_names(&self) -> Vec<&str> {
        self.succeeded.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseState {
    Empty,
    Ready,
}

/// Caller-visible status, recomputed on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseStatus {
    pub state: KnowledgeBaseState,
    pub document_count: usize,
    pub chunk_count: usize,
}

impl KnowledgeBaseStatus {
    /// The derived initialization flag.
    pub fn initialized(&self) -> bool {
        self.state == KnowledgeBaseState::Ready
    }
}

/// A ranked chunk returned to the reasoning layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub document_name: String,
    pub chunk_text: String,
    pub position: u32,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_name("a.pdf").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_name("Report.DOCX").unwrap(), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_name("notes.txt").unwrap(), DocumentFormat::Txt);
    }

    #[test]
    fn test_format_unsupported() {
        let err = DocumentFormat::from_name("sheet.xlsx").unwrap_err();
        assert!(matches!(err, KnowledgeError::UnsupportedFormat(ref ext) if ext == ".xlsx"));

        let err = DocumentFormat::from_name("README").unwrap_err();
        assert!(matches!(err, KnowledgeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_chunk_ids_are_ordered() {
        let record = DocumentRecord {
            name: "spec.txt".to_string(),
            format: DocumentFormat::Txt,
            raw_text: String::new(),
            chunk_count: 3,
            status: DocumentStatus::Succeeded,
            ingested_at: Utc::now(),
            size_bytes: 0,
            content_hash: String::new(),
            images_found: 0,
            images_recognized: 0,
        };
        assert_eq!(record.chunk_ids(), vec!["spec.txt#0", "spec.txt#1", "spec.txt#2"]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&DocumentStatus::Failed {
            reason: "empty".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"empty"}"#);
    }

    #[test]
    fn test_from_paths_keeps_readable_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "Pump maintenance schedule").unwrap();
        let missing = dir.path().join("missing.txt");

        let request = IngestRequest::from_paths(&[good, missing.clone()]);
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.files[0].name, "good.txt");

        assert_eq!(request.unreadable.len(), 1);
        assert_eq!(request.unreadable[0].name, "missing.txt");
        assert!(request.unreadable[0]
            .reason
            .contains(&missing.display().to_string()));
    }
}
