//! Knowledge base coordinator.
//!
//! Owns the document records, the live index manager and the persistence
//! manager, and keeps the three in agreement:
//!
//! - mutations are serialized by a single writer lock
//! - every mutation works on a copy of the state, saves a snapshot of the
//!   copy and only then swaps it in, so a failed batch leaves the previous
//!   state (in memory and on disk) untouched
//! - readiness is never stored; [`KnowledgeBase::status`] derives it from the
//!   committed state on every call

use crate::chunker::{AdaptiveChunker, ChunkPlan, ChunkedBatch};
use crate::config::{load_config, KnowledgeBaseConfig};
use crate::embeddings::{create_provider, EmbeddingProvider};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::extract::{extract, Extraction};
use crate::index::IndexManager;
use crate::ocr::OcrFallback;
use crate::persistence::{sha256_hex, PersistenceManager, StorageInfo};
use crate::progress::ProgressReporter;
use crate::types::{
    Chunk, DocumentFormat, DocumentRecord, DocumentStatus, FailedFile, IngestReport,
    IngestRequest, IngestedDocument, KnowledgeBaseState, KnowledgeBaseStatus,
};
use crate::vector_index::SearchHit;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Committed state: documents and the index built from their chunks.
#[derive(Debug, Clone)]
struct BaseState {
    documents: BTreeMap<String, DocumentRecord>,
    index: IndexManager,
}

impl BaseState {
    fn is_ready(&self) -> bool {
        !self.documents.is_empty() && self.index.is_loaded()
    }

    fn status(&self) -> KnowledgeBaseStatus {
        KnowledgeBaseStatus {
            state: if self.is_ready() {
                KnowledgeBaseState::Ready
            } else {
                KnowledgeBaseState::Empty
            },
            document_count: self.documents.len(),
            chunk_count: self.index.row_count(),
        }
    }
}

/// A file that extracted successfully and waits for chunking.
#[derive(Debug)]
struct ExtractedFile {
    name: String,
    format: DocumentFormat,
    size_bytes: u64,
    extraction: Extraction,
}

/// Chunks and records of a batch, ready to be indexed.
#[derive(Debug)]
struct PreparedBatch {
    chunks: Vec<Chunk>,
    records: Vec<DocumentRecord>,
    ingested: Vec<IngestedDocument>,
    chunk_plan: Option<ChunkPlan>,
}

/// Summary for `info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseInfo {
    pub name: String,
    pub status: KnowledgeBaseStatus,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub storage: StorageInfo,
}

#[derive(Debug)]
pub struct KnowledgeBase {
    name: String,
    config: KnowledgeBaseConfig,
    provider: Arc<dyn EmbeddingProvider>,
    ocr: OcrFallback,
    chunker: AdaptiveChunker,
    persistence: PersistenceManager,
    progress: ProgressReporter,
    write_lock: Mutex<()>,
    state: RwLock<BaseState>,
}

impl KnowledgeBase {
    /// Assemble a knowledge base from its parts. Nothing is read from disk
    /// until [`KnowledgeBase::load`].
    pub fn new(
        config: KnowledgeBaseConfig,
        provider: Arc<dyn EmbeddingProvider>,
        ocr: OcrFallback,
        persistence: PersistenceManager,
    ) -> Self {
        let index = IndexManager::new(provider.clone(), config.embedding.batch_size);
        Self {
            name: config.name.clone(),
            chunker: AdaptiveChunker::new(&config.chunking),
            config,
            provider,
            ocr,
            persistence,
            progress: ProgressReporter::noop(),
            write_lock: Mutex::new(()),
            state: RwLock::new(BaseState {
                documents: BTreeMap::new(),
                index,
            }),
        }
    }

    /// Open `<workspace>/.docsage/knowledge/<base>` with its stored config.
    pub fn open(workspace: &Path, base_name: &str) -> KnowledgeResult<Self> {
        let config = load_config(workspace, base_name)?;
        Self::with_config(workspace, config)
    }

    /// Open a base with an explicit config (after CLI or env overrides).
    pub fn with_config(workspace: &Path, config: KnowledgeBaseConfig) -> KnowledgeResult<Self> {
        config.validate()?;
        let provider = create_provider(&config.embedding)?;
        let ocr = OcrFallback::from_config(&config.ocr);
        let persistence = PersistenceManager::for_base(workspace, &config.name);
        Ok(Self::new(config, provider, ocr, persistence))
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.persistence = self.persistence.with_progress(progress.clone());
        let state = self.state.get_mut();
        state.index = state.index.clone().with_progress(progress.clone());
        self.progress = progress;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &KnowledgeBaseConfig {
        &self.config
    }

    /// Current status, derived from the committed state.
    pub async fn status(&self) -> KnowledgeBaseStatus {
        self.state.read().await.status()
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_ready()
    }

    /// Build the knowledge base from scratch, replacing anything committed.
    ///
    /// Fails with `NoDocumentsProcessed` when every file fails, leaving the
    /// previous state in place.
    pub async fn create(&self, request: IngestRequest) -> KnowledgeResult<IngestReport> {
        let _writer = self.write_lock.lock().await;
        let start = Instant::now();

        tracing::info!(base = %self.name, files = request.files.len(), "Creating knowledge base");

        let (extracted, mut failed) = self.extract_all(request, &BTreeSet::new()).await;
        if extracted.is_empty() {
            tracing::warn!(base = %self.name, failed = failed.len(), "No documents could be processed");
            return Err(KnowledgeError::NoDocumentsProcessed { failed });
        }

        let batch = self.prepare(extracted, &mut failed)?;

        let mut index = self.fresh_index();
        index.build(batch.chunks).await?;

        let documents: BTreeMap<String, DocumentRecord> = batch
            .records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let next = BaseState { documents, index };
        self.commit(next, |state| {
            let chunks_added = state.index.row_count();
            IngestReport {
                succeeded: batch.ingested,
                failed,
                chunk_plan: batch.chunk_plan,
                chunks_added,
                total_chunks: chunks_added,
                duration_secs: start.elapsed().as_secs_f64(),
            }
        })
        .await
    }

    /// Add documents to a ready knowledge base.
    ///
    /// Names already present (or repeated in the batch) are rejected per
    /// file. When nothing in the batch is usable the report lists the
    /// failures and the state is left as it was.
    pub async fn add(&self, request: IngestRequest) -> KnowledgeResult<IngestReport> {
        let _writer = self.write_lock.lock().await;
        let start = Instant::now();

        let mut next = self.state.read().await.clone();
        if !next.is_ready() {
            return Err(KnowledgeError::NotReady);
        }

        tracing::info!(base = %self.name, files = request.files.len(), "Adding documents");

        let existing: BTreeSet<String> = next.documents.keys().cloned().collect();
        let (extracted, mut failed) = self.extract_all(request, &existing).await;

        let report_only = |failed: Vec<FailedFile>, total_chunks: usize| IngestReport {
            failed,
            total_chunks,
            duration_secs: start.elapsed().as_secs_f64(),
            ..Default::default()
        };

        if extracted.is_empty() {
            tracing::warn!(base = %self.name, failed = failed.len(), "Nothing to add");
            return Ok(report_only(failed, next.index.row_count()));
        }

        let names: Vec<String> = extracted.iter().map(|f| f.name.clone()).collect();
        let batch = match self.prepare(extracted, &mut failed) {
            Ok(batch) => batch,
            Err(KnowledgeError::NoMeaningfulContent) => {
                failed.extend(
                    names
                        .into_iter()
                        .map(|name| FailedFile::new(name, KnowledgeError::NoMeaningfulContent)),
                );
                tracing::warn!(base = %self.name, "No meaningful content in batch; nothing added");
                return Ok(report_only(failed, next.index.row_count()));
            }
            Err(e) => return Err(e),
        };

        let chunks_added = batch.chunks.len();
        next.index.add(batch.chunks).await?;
        for record in batch.records {
            next.documents.insert(record.name.clone(), record);
        }

        self.commit(next, |state| IngestReport {
            succeeded: batch.ingested,
            failed,
            chunk_plan: batch.chunk_plan,
            chunks_added,
            total_chunks: state.index.row_count(),
            duration_secs: start.elapsed().as_secs_f64(),
        })
        .await
    }

    /// Delete a document and all of its chunks. Returns the rows removed.
    ///
    /// Deleting the last document clears the snapshot and leaves the base
    /// `Empty`.
    pub async fn delete(&self, name: &str) -> KnowledgeResult<usize> {
        let _writer = self.write_lock.lock().await;

        let mut next = self.state.read().await.clone();
        if next.documents.remove(name).is_none() {
            return Err(KnowledgeError::DocumentNotFound(name.to_string()));
        }
        let removed = next.index.remove(name);

        if next.documents.is_empty() {
            self.persistence.clear()?;
            next.index.unload();
            *self.state.write().await = next;
            tracing::info!(base = %self.name, document = name, "Deleted last document; knowledge base is empty");
            return Ok(removed);
        }

        self.commit(next, |_| ()).await?;
        tracing::info!(base = %self.name, document = name, rows = removed, "Deleted document");
        Ok(removed)
    }

    /// Load the snapshot from disk.
    ///
    /// A missing snapshot leaves the base `Empty`. A corrupt index is rebuilt
    /// from the raw texts kept in metadata; when that is impossible the error
    /// is returned and the base stays `Empty`.
    pub async fn load(&self) -> KnowledgeResult<KnowledgeBaseStatus> {
        let _writer = self.write_lock.lock().await;

        let reason = match self.persistence.load() {
            Ok(snapshot) => {
                let mut index = self.fresh_index();
                match index.attach(snapshot.index) {
                    Ok(()) => {
                        let next = BaseState {
                            documents: snapshot.metadata.documents,
                            index,
                        };
                        let status = next.status();
                        *self.state.write().await = next;
                        tracing::info!(
                            base = %self.name,
                            documents = status.document_count,
                            chunks = status.chunk_count,
                            "Loaded knowledge base"
                        );
                        return Ok(status);
                    }
                    Err(KnowledgeError::IndexCorruption(reason)) => reason,
                    Err(e) => return Err(e),
                }
            }
            Err(KnowledgeError::NoSnapshot) => {
                tracing::info!(base = %self.name, "No snapshot found; knowledge base is empty");
                return Ok(self.reset_state().await);
            }
            Err(KnowledgeError::IndexCorruption(reason)) => reason,
            Err(e) => return Err(e),
        };

        tracing::warn!(base = %self.name, %reason, "Snapshot is corrupt; rebuilding from stored text");
        self.reset_state().await;
        self.rebuild(reason).await
    }

    /// Remove every document and the snapshot.
    pub async fn reset(&self) -> KnowledgeResult<()> {
        let _writer = self.write_lock.lock().await;
        self.persistence.clear()?;
        self.reset_state().await;
        tracing::info!(base = %self.name, "Knowledge base reset");
        Ok(())
    }

    /// The `k` chunks nearest to `query`. Fails with `NotReady` when empty.
    pub async fn search(&self, query: &str, k: usize) -> KnowledgeResult<Vec<SearchHit>> {
        let state = self.state.read().await;
        if !state.is_ready() {
            return Err(KnowledgeError::NotReady);
        }
        state.index.search(query, k).await
    }

    /// Names of the documents, sorted.
    pub async fn document_names(&self) -> Vec<String> {
        self.state.read().await.documents.keys().cloned().collect()
    }

    pub async fn document(&self, name: &str) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(name).cloned()
    }

    /// Full extracted text of a document (OCR blocks keep their markers).
    pub async fn raw_text(&self, name: &str) -> KnowledgeResult<String> {
        self.state
            .read()
            .await
            .documents
            .get(name)
            .map(|doc| doc.raw_text.clone())
            .ok_or_else(|| KnowledgeError::DocumentNotFound(name.to_string()))
    }

    pub async fn info(&self) -> KnowledgeResult<KnowledgeBaseInfo> {
        let status = self.status().await;
        Ok(KnowledgeBaseInfo {
            name: self.name.clone(),
            status,
            embedding_provider: self.provider.provider_name().to_string(),
            embedding_model: self.provider.model_name().to_string(),
            storage: self.persistence.info()?,
        })
    }

    /// Copy the live snapshot to `backups/<name>/`.
    pub async fn backup(&self, name: &str) -> KnowledgeResult<std::path::PathBuf> {
        let _writer = self.write_lock.lock().await;
        self.persistence.backup(name)
    }

    fn fresh_index(&self) -> IndexManager {
        IndexManager::new(self.provider.clone(), self.config.embedding.batch_size)
            .with_progress(self.progress.clone())
    }

    /// Save `next` and make it the committed state.
    async fn commit<T>(
        &self,
        next: BaseState,
        report: impl FnOnce(&BaseState) -> T,
    ) -> KnowledgeResult<T> {
        let index = next.index.index().ok_or(KnowledgeError::NotReady)?;
        self.persistence.save(index, &next.documents)?;

        let result = report(&next);
        *self.state.write().await = next;
        Ok(result)
    }

    async fn reset_state(&self) -> KnowledgeBaseStatus {
        let next = BaseState {
            documents: BTreeMap::new(),
            index: self.fresh_index(),
        };
        let status = next.status();
        *self.state.write().await = next;
        status
    }

    /// Re-chunk and re-embed the raw texts recorded in the snapshot metadata.
    async fn rebuild(&self, reason: String) -> KnowledgeResult<KnowledgeBaseStatus> {
        let metadata = match self.persistence.load_metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!(base = %self.name, error = %e, "Snapshot metadata is unreadable; cannot rebuild");
                return Err(KnowledgeError::IndexCorruption(reason));
            }
        };

        let texts: Vec<(&str, &str)> = metadata
            .documents
            .values()
            .map(|doc| (doc.name.as_str(), doc.raw_text.as_str()))
            .collect();
        let batch = match self.chunker.chunk_batch(&texts) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(base = %self.name, error = %e, "Stored text yields no chunks; cannot rebuild");
                return Err(KnowledgeError::IndexCorruption(reason));
            }
        };

        for dropped in &batch.empty {
            tracing::warn!(document = %dropped.name, "Dropped during rebuild: {}", dropped.reason);
        }

        let counts: HashMap<String, usize> = batch
            .documents
            .iter()
            .map(|doc| (doc.name.clone(), doc.chunks.len()))
            .collect();
        let documents: BTreeMap<String, DocumentRecord> = metadata
            .documents
            .into_iter()
            .filter_map(|(name, mut record)| {
                let count = *counts.get(&name)?;
                record.chunk_count = count;
                Some((name, record))
            })
            .collect();

        let mut index = self.fresh_index();
        index.build(batch.into_chunks()).await?;

        let status = self
            .commit(BaseState { documents, index }, BaseState::status)
            .await?;
        tracing::info!(
            base = %self.name,
            documents = status.document_count,
            chunks = status.chunk_count,
            "Rebuilt knowledge base index"
        );
        Ok(status)
    }

    /// Extract every file in parallel. Duplicates and unsupported formats
    /// are rejected before any work is spawned; unreadable paths arrive
    /// already failed.
    async fn extract_all(
        &self,
        request: IngestRequest,
        existing: &BTreeSet<String>,
    ) -> (Vec<ExtractedFile>, Vec<FailedFile>) {
        let IngestRequest { files, unreadable } = request;
        let total = files.len() as u64;
        let mut failed = unreadable;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut tasks = Vec::new();

        for file in files {
            if existing.contains(&file.name) || !seen.insert(file.name.clone()) {
                tracing::warn!(document = %file.name, "Rejected duplicate document");
                failed.push(FailedFile::new(
                    file.name.clone(),
                    KnowledgeError::DuplicateDocument(file.name),
                ));
                continue;
            }

            let format = match DocumentFormat::from_name(&file.name) {
                Ok(format) => format,
                Err(e) => {
                    tracing::warn!(document = %file.name, "{}", e);
                    failed.push(FailedFile::new(file.name, e));
                    continue;
                }
            };

            let ocr = self.ocr.clone();
            let name = file.name.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let size_bytes = file.bytes.len() as u64;
                extract(&file.name, &file.bytes, format, &ocr).map(|extraction| ExtractedFile {
                    name: file.name,
                    format,
                    size_bytes,
                    extraction,
                })
            });
            tasks.push((name, handle));
        }

        let (names, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut extracted = Vec::new();
        for (i, (name, result)) in names.into_iter().zip(results).enumerate() {
            self.progress.extract(i as u64 + 1, total, &name);
            match result {
                Ok(Ok(file)) => {
                    if file.extraction.images_found > 0 {
                        self.progress.ocr(
                            &name,
                            file.extraction.images_found,
                            file.extraction.images_recognized,
                        );
                    }
                    extracted.push(file);
                }
                Ok(Err(e)) => {
                    tracing::warn!(document = %name, "Extraction failed: {}", e);
                    failed.push(FailedFile::new(name, e));
                }
                Err(e) => {
                    tracing::error!(document = %name, "Extraction task failed: {}", e);
                    failed.push(FailedFile::new(name, format!("extraction task failed: {}", e)));
                }
            }
        }

        (extracted, failed)
    }

    /// Chunk a batch and build its records. Documents whose every chunk was
    /// discarded join `failed`.
    fn prepare(
        &self,
        extracted: Vec<ExtractedFile>,
        failed: &mut Vec<FailedFile>,
    ) -> KnowledgeResult<PreparedBatch> {
        let batch: ChunkedBatch = {
            let texts: Vec<(&str, &str)> = extracted
                .iter()
                .map(|f| (f.name.as_str(), f.extraction.text.as_str()))
                .collect();
            self.chunker.chunk_batch(&texts)?
        };

        self.progress.chunk(
            batch.documents.len() as u64,
            batch.total_chunks(),
            batch.batch_plan.map(|plan| plan.chunk_size),
        );

        failed.extend(batch.empty.iter().cloned());

        let mut by_name: HashMap<String, ExtractedFile> = extracted
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect();

        let mut chunks = Vec::with_capacity(batch.total_chunks());
        let mut records = Vec::with_capacity(batch.documents.len());
        let mut ingested = Vec::with_capacity(batch.documents.len());
        let chunk_plan = batch.batch_plan;

        for doc in batch.documents {
            let Some(file) = by_name.remove(&doc.name) else {
                continue;
            };
            let extraction = file.extraction;

            ingested.push(IngestedDocument {
                name: doc.name.clone(),
                format: file.format,
                chunk_count: doc.chunks.len(),
                chunk_size: doc.plan.chunk_size,
                overlap: doc.plan.overlap,
                effective_chars: doc.effective_chars,
                images_found: extraction.images_found,
                images_recognized: extraction.images_recognized,
            });
            records.push(DocumentRecord {
                name: doc.name,
                format: file.format,
                content_hash: sha256_hex(extraction.text.as_bytes()),
                raw_text: extraction.text,
                chunk_count: doc.chunks.len(),
                status: DocumentStatus::Succeeded,
                ingested_at: Utc::now(),
                size_bytes: file.size_bytes,
                images_found: extraction.images_found,
                images_recognized: extraction.images_recognized,
            });
            chunks.extend(doc.chunks);
        }

        Ok(PreparedBatch {
            chunks,
            records,
            ingested,
            chunk_plan,
        })
    }
}
