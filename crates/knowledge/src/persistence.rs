//! Snapshot persistence.
//!
//! A snapshot is a generation directory holding the serialized index and the
//! document metadata. `CURRENT` names the live generation and is the only file
//! ever replaced in place (temp file + rename), so a crash at any point of a
//! save leaves the previous generation loadable.
//!
//! ```text
//! snapshot/
//!   CURRENT          "gen-7"
//!   gen-7/
//!     index.json
//!     metadata.json  (sha256 of index.json, row count, documents)
//! ```

use crate::config::{get_backups_dir, get_snapshot_dir};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::progress::ProgressReporter;
use crate::types::DocumentRecord;
use crate::vector_index::{FlatIndex, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CURRENT_FILE: &str = "CURRENT";
const INDEX_FILE: &str = "index.json";
const METADATA_FILE: &str = "metadata.json";
const GENERATION_PREFIX: &str = "gen-";
const SNAPSHOT_VERSION: u32 = 1;

/// Contents of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
    /// SHA-256 of `index.json`
    pub index_sha256: String,
    pub total_rows: usize,
    pub documents: BTreeMap<String, DocumentRecord>,
}

/// A snapshot read back from disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub index: FlatIndex,
    pub metadata: SnapshotMetadata,
}

/// Storage summary for `info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInfo {
    pub exists: bool,
    pub generation: Option<u64>,
    pub document_count: usize,
    pub document_names: Vec<String>,
    pub size_bytes: u64,
    /// `size_bytes` formatted for display
    pub size: String,
}

#[derive(Debug, Clone)]
pub struct PersistenceManager {
    snapshot_dir: PathBuf,
    backups_dir: PathBuf,
    progress: ProgressReporter,
}

impl PersistenceManager {
    pub fn new(snapshot_dir: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            backups_dir: backups_dir.into(),
            progress: ProgressReporter::noop(),
        }
    }

    /// Manager for `<workspace>/.docsage/knowledge/<base>/`.
    pub fn for_base(workspace: &Path, base_name: &str) -> Self {
        Self::new(
            get_snapshot_dir(workspace, base_name),
            get_backups_dir(workspace, base_name),
        )
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Whether a live generation is recorded.
    pub fn exists(&self) -> bool {
        self.snapshot_dir.join(CURRENT_FILE).is_file()
    }

    /// Write `index` and `documents` as a new generation and make it live.
    ///
    /// Returns the generation number. Refuses to write a snapshot whose row
    /// count disagrees with the documents' chunk counts.
    pub fn save(
        &self,
        index: &FlatIndex,
        documents: &BTreeMap<String, DocumentRecord>,
    ) -> KnowledgeResult<u64> {
        check_consistency(index, documents)?;

        fs::create_dir_all(&self.snapshot_dir)?;
        let generation = self.latest_generation()?.map(|g| g + 1).unwrap_or(1);
        let gen_dir = self.generation_dir(generation);
        fs::create_dir_all(&gen_dir)?;

        let index_bytes = serde_json::to_vec(index)?;
        let metadata = SnapshotMetadata {
            version: SNAPSHOT_VERSION,
            generation,
            saved_at: Utc::now(),
            index_sha256: sha256_hex(&index_bytes),
            total_rows: index.len(),
            documents: documents.clone(),
        };

        write_synced(&gen_dir.join(INDEX_FILE), &index_bytes)?;
        write_synced(
            &gen_dir.join(METADATA_FILE),
            &serde_json::to_vec_pretty(&metadata)?,
        )?;

        self.write_current(generation)?;
        self.prune(generation);

        tracing::info!(
            generation,
            rows = metadata.total_rows,
            documents = documents.len(),
            "Saved knowledge base snapshot"
        );
        self.progress.persist(generation);
        Ok(generation)
    }

    /// Read and verify the live generation.
    pub fn load(&self) -> KnowledgeResult<Snapshot> {
        let generation = self.current_generation()?;
        let gen_dir = self.generation_dir(generation);

        let index_bytes = read_snapshot_file(&gen_dir.join(INDEX_FILE))?;
        let metadata = self.read_metadata(generation)?;

        let checksum = sha256_hex(&index_bytes);
        if checksum != metadata.index_sha256 {
            return Err(KnowledgeError::IndexCorruption(format!(
                "{} checksum mismatch in generation {}",
                INDEX_FILE, generation
            )));
        }

        let index: FlatIndex = serde_json::from_slice(&index_bytes).map_err(|e| {
            KnowledgeError::IndexCorruption(format!("unreadable {}: {}", INDEX_FILE, e))
        })?;
        index.validate()?;

        if index.len() != metadata.total_rows {
            return Err(KnowledgeError::IndexCorruption(format!(
                "index has {} rows, metadata records {}",
                index.len(),
                metadata.total_rows
            )));
        }
        check_consistency(&index, &metadata.documents)?;

        tracing::debug!(
            generation,
            rows = index.len(),
            documents = metadata.documents.len(),
            "Loaded knowledge base snapshot"
        );
        Ok(Snapshot { index, metadata })
    }

    /// Read only the metadata of the live generation.
    ///
    /// Used to rebuild the index from stored raw texts when `index.json` is
    /// damaged.
    pub fn load_metadata(&self) -> KnowledgeResult<SnapshotMetadata> {
        let generation = self.current_generation()?;
        self.read_metadata(generation)
    }

    /// Remove the snapshot entirely. Backups are kept.
    pub fn clear(&self) -> KnowledgeResult<()> {
        let current = self.snapshot_dir.join(CURRENT_FILE);
        if current.exists() {
            // Drop the pointer first: an interrupted clear reads as no snapshot
            fs::remove_file(&current)?;
        }
        // Without the pointer the snapshot is gone; leftover generations are
        // pruned by the next save
        if self.snapshot_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.snapshot_dir) {
                tracing::warn!(dir = %self.snapshot_dir.display(), "Could not remove old generations: {}", e);
            }
        }
        tracing::info!(dir = %self.snapshot_dir.display(), "Cleared knowledge base snapshot");
        Ok(())
    }

    pub fn info(&self) -> KnowledgeResult<StorageInfo> {
        if !self.exists() {
            return Ok(StorageInfo {
                exists: false,
                generation: None,
                document_count: 0,
                document_names: Vec::new(),
                size_bytes: 0,
                size: format_bytes(0),
            });
        }

        let metadata = self.load_metadata()?;
        let size_bytes = dir_size(&self.generation_dir(metadata.generation))?;

        Ok(StorageInfo {
            exists: true,
            generation: Some(metadata.generation),
            document_count: metadata.documents.len(),
            document_names: metadata.documents.keys().cloned().collect(),
            size_bytes,
            size: format_bytes(size_bytes),
        })
    }

    /// Copy the live generation to `backups/<name>/`.
    pub fn backup(&self, name: &str) -> KnowledgeResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(KnowledgeError::Config(format!(
                "Invalid backup name '{}'",
                name
            )));
        }

        let generation = self.current_generation()?;
        let source = self.generation_dir(generation);
        let target = self.backups_dir.join(name);
        if target.exists() {
            return Err(KnowledgeError::Config(format!(
                "Backup '{}' already exists at {}",
                name,
                target.display()
            )));
        }

        fs::create_dir_all(&target)?;
        for file in [INDEX_FILE, METADATA_FILE] {
            fs::copy(source.join(file), target.join(file))?;
        }

        tracing::info!(generation, backup = %target.display(), "Backed up knowledge base snapshot");
        Ok(target)
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.snapshot_dir
            .join(format!("{}{}", GENERATION_PREFIX, generation))
    }

    fn current_generation(&self) -> KnowledgeResult<u64> {
        let pointer = self.snapshot_dir.join(CURRENT_FILE);
        let content = match fs::read_to_string(&pointer) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KnowledgeError::NoSnapshot)
            }
            Err(e) => return Err(e.into()),
        };

        parse_generation(content.trim()).ok_or_else(|| {
            KnowledgeError::IndexCorruption(format!(
                "{} names an invalid generation: {:?}",
                CURRENT_FILE,
                content.trim()
            ))
        })
    }

    fn read_metadata(&self, generation: u64) -> KnowledgeResult<SnapshotMetadata> {
        let bytes = read_snapshot_file(&self.generation_dir(generation).join(METADATA_FILE))?;
        let metadata: SnapshotMetadata = serde_json::from_slice(&bytes).map_err(|e| {
            KnowledgeError::IndexCorruption(format!("unreadable {}: {}", METADATA_FILE, e))
        })?;

        if metadata.generation != generation {
            return Err(KnowledgeError::IndexCorruption(format!(
                "{} of generation {} claims generation {}",
                METADATA_FILE, generation, metadata.generation
            )));
        }
        Ok(metadata)
    }

    /// Highest generation directory present, live or not.
    fn latest_generation(&self) -> KnowledgeResult<Option<u64>> {
        Ok(self.generations()?.into_iter().max())
    }

    fn generations(&self) -> KnowledgeResult<Vec<u64>> {
        if !self.snapshot_dir.exists() {
            return Ok(Vec::new());
        }

        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.snapshot_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
                generations.push(generation);
            }
        }
        Ok(generations)
    }

    fn write_current(&self, generation: u64) -> KnowledgeResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.snapshot_dir)?;
        write!(temp, "{}{}", GENERATION_PREFIX, generation)?;
        temp.as_file().sync_all()?;
        temp.persist(self.snapshot_dir.join(CURRENT_FILE))
            .map_err(|e| KnowledgeError::Io(e.error))?;
        Ok(())
    }

    /// Delete every generation but `live`. The new snapshot is already
    /// committed, so failures are only logged.
    fn prune(&self, live: u64) {
        let generations = match self.generations() {
            Ok(generations) => generations,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list old snapshot generations");
                return;
            }
        };

        for generation in generations.into_iter().filter(|g| *g != live) {
            let dir = self.generation_dir(generation);
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Could not remove old snapshot generation");
            }
        }
    }
}

/// Row count and per-document counts must match the records.
fn check_consistency(
    index: &FlatIndex,
    documents: &BTreeMap<String, DocumentRecord>,
) -> KnowledgeResult<()> {
    let expected: BTreeMap<String, usize> = documents
        .values()
        .map(|doc| (doc.name.clone(), doc.chunk_count))
        .collect();
    let total: usize = expected.values().sum();

    if index.len() != total {
        return Err(KnowledgeError::IndexCorruption(format!(
            "index has {} rows but documents own {} chunks",
            index.len(),
            total
        )));
    }

    let actual = index.document_chunk_counts();
    if actual != expected {
        return Err(KnowledgeError::IndexCorruption(
            "index rows do not match document chunk counts".to_string(),
        ));
    }
    Ok(())
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn read_snapshot_file(path: &Path) -> KnowledgeResult<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
            KnowledgeError::IndexCorruption(format!("missing {}", path.display())),
        ),
        Err(e) => Err(e.into()),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> KnowledgeResult<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn dir_size(dir: &Path) -> KnowledgeResult<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
