//! End-to-end scenarios across extraction, chunking, indexing and persistence.

mod recovery;

use crate::config::{ChunkSizing, KnowledgeBaseConfig};
use crate::coordinator::KnowledgeBase;
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::ocr::testing::ScriptedEngine;
use crate::ocr::OcrFallback;
use crate::persistence::PersistenceManager;
use crate::types::SourceFile;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) const DIMENSIONS: usize = 256;

pub(crate) fn config(sizing: ChunkSizing) -> KnowledgeBaseConfig {
    let mut config = KnowledgeBaseConfig {
        name: "scenario".to_string(),
        ..Default::default()
    };
    config.chunking.sizing = sizing;
    config.embedding.dimensions = DIMENSIONS;
    config
}

pub(crate) fn persistence(dir: &Path) -> PersistenceManager {
    PersistenceManager::new(dir.join("snapshot"), dir.join("backups"))
}

pub(crate) fn open_with(
    dir: &TempDir,
    sizing: ChunkSizing,
    provider: Arc<dyn EmbeddingProvider>,
    engine: ScriptedEngine,
) -> KnowledgeBase {
    KnowledgeBase::new(
        config(sizing),
        provider,
        OcrFallback::new(Arc::new(engine), 3),
        persistence(dir.path()),
    )
}

pub(crate) fn open(dir: &TempDir) -> KnowledgeBase {
    open_with(
        dir,
        ChunkSizing::Batch,
        Arc::new(TrigramProvider::new(DIMENSIONS)),
        ScriptedEngine::new(),
    )
}

pub(crate) fn txt(name: &str, text: &str) -> SourceFile {
    SourceFile::new(name, text.as_bytes().to_vec())
}

/// Repeated sentences about `topic`, cut to exactly `chars` characters.
pub(crate) fn prose(topic: &str, chars: usize) -> String {
    let sentence = format!("Every {} inspection follows the written checklist. ", topic);
    sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
}

/// A docx whose only content is one embedded image.
pub(crate) fn scanned_docx(image: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    writer.start_file("word/document.xml", options).unwrap();
    writer
        .write_all(
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p/></w:body></w:document>"#,
        )
        .unwrap();
    writer.start_file("word/media/image1.png", options).unwrap();
    writer.write_all(image).unwrap();

    writer.finish().unwrap().into_inner()
}
