//! Knowledge base command handler.
//!
//! Every subcommand opens the base, loads its snapshot and runs one
//! coordinator operation. Results go to stdout; progress and logs go to
//! stderr.

use clap::{Args, Subcommand};
use docsage_core::{config::AppConfig, AppError, AppResult};
use docsage_knowledge::config::{load_config, save_config};
use docsage_knowledge::retrieval::snippet;
use docsage_knowledge::{
    format_context, IngestReport, IngestRequest, KnowledgeBase, KnowledgeBaseConfig,
    ProgressEvent, ProgressReporter, Retriever,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Knowledge base management
#[derive(Args, Debug)]
pub struct KbCommand {
    /// Knowledge base name (default: from config)
    #[arg(short, long, global = true, env = "DOCSAGE_BASE")]
    pub base: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub action: KbAction,
}

#[derive(Subcommand, Debug)]
pub enum KbAction {
    /// Build the knowledge base from files, replacing its contents
    Create(CreateArgs),
    /// Add files to an existing knowledge base
    Add(AddArgs),
    /// Delete a document and its chunks
    Delete(DeleteArgs),
    /// List documents
    List,
    /// Show readiness and storage details
    Status,
    /// Retrieve the chunks most relevant to a query
    Search(SearchArgs),
    /// Show one document
    Show(ShowArgs),
    /// Remove every document and the snapshot
    Reset(ResetArgs),
    /// Copy the current snapshot to a named backup
    Backup(BackupArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Files to ingest (pdf, docx, txt)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Files to ingest (pdf, docx, txt)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Document name as listed by `kb list`
    pub name: String,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub query: String,

    /// Number of chunks to retrieve (default: base config)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Drop chunks scoring below this similarity
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Print the chunks as prompt context instead of a ranked list
    #[arg(long)]
    pub context: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Document name
    pub name: String,

    /// Print the full extracted text
    #[arg(long)]
    pub text: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Backup name
    pub name: String,
}

impl KbCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let base = self
            .base
            .clone()
            .unwrap_or_else(|| config.default_base.clone());
        tracing::debug!(base = %base, action = ?self.action, "Executing kb command");

        match &self.action {
            KbAction::Create(args) => self.create(config, &base, args).await,
            KbAction::Add(args) => self.add(config, &base, args).await,
            KbAction::Delete(args) => self.delete(config, &base, args).await,
            KbAction::List => self.list(config, &base).await,
            KbAction::Status => self.status(config, &base).await,
            KbAction::Search(args) => self.search(config, &base, args).await,
            KbAction::Show(args) => self.show(config, &base, args).await,
            KbAction::Reset(args) => self.reset(config, &base, args).await,
            KbAction::Backup(args) => self.backup(config, &base, args).await,
        }
    }

    async fn create(&self, config: &AppConfig, base: &str, args: &CreateArgs) -> AppResult<()> {
        let kb_config = base_config(config, base)?;
        save_config(&config.workspace, &kb_config)?;

        // Creating replaces the base, so a damaged snapshot is not read first
        let kb = self.assemble(config, kb_config)?;
        let request = IngestRequest::from_paths(&args.files);
        let report = kb.create(request).await?;

        if self.json {
            return print_json(&report);
        }
        println!(
            "Created knowledge base '{}' from {} document(s)",
            base,
            report.succeeded.len()
        );
        print_report(&report);
        Ok(())
    }

    async fn add(&self, config: &AppConfig, base: &str, args: &AddArgs) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;
        let request = IngestRequest::from_paths(&args.files);
        let report = kb.add(request).await?;

        if self.json {
            return print_json(&report);
        }
        println!(
            "Added {} document(s) to '{}'",
            report.succeeded.len(),
            base
        );
        print_report(&report);
        Ok(())
    }

    async fn delete(&self, config: &AppConfig, base: &str, args: &DeleteArgs) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;
        let removed = kb.delete(&args.name).await?;
        let status = kb.status().await;

        if self.json {
            return print_json(&serde_json::json!({
                "base": base,
                "deleted": args.name,
                "chunksRemoved": removed,
                "status": status,
            }));
        }
        println!("Deleted '{}' ({} chunks removed)", args.name, removed);
        if !status.initialized() {
            println!("Knowledge base '{}' is now empty", base);
        }
        Ok(())
    }

    async fn list(&self, config: &AppConfig, base: &str) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;

        let mut documents = Vec::new();
        for name in kb.document_names().await {
            if let Some(record) = kb.document(&name).await {
                documents.push(record);
            }
        }

        if self.json {
            let rows: Vec<_> = documents
                .iter()
                .map(|doc| {
                    serde_json::json!({
                        "name": doc.name,
                        "format": doc.format,
                        "chunks": doc.chunk_count,
                        "sizeBytes": doc.size_bytes,
                        "ingestedAt": doc.ingested_at,
                        "imagesFound": doc.images_found,
                        "imagesRecognized": doc.images_recognized,
                    })
                })
                .collect();
            return print_json(&rows);
        }

        if documents.is_empty() {
            println!("Knowledge base '{}' has no documents", base);
            return Ok(());
        }
        for doc in &documents {
            println!(
                "{}  ({}, {} chunks, {} bytes, added {})",
                doc.name,
                doc.format.as_str(),
                doc.chunk_count,
                doc.size_bytes,
                doc.ingested_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }

    async fn status(&self, config: &AppConfig, base: &str) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;
        let info = kb.info().await?;

        if self.json {
            return print_json(&info);
        }
        println!("Knowledge base: {}", info.name);
        println!(
            "  State: {}",
            if info.status.initialized() { "ready" } else { "empty" }
        );
        println!("  Documents: {}", info.status.document_count);
        println!("  Chunks: {}", info.status.chunk_count);
        println!(
            "  Embeddings: {} ({})",
            info.embedding_provider, info.embedding_model
        );
        if let Some(generation) = info.storage.generation {
            println!("  Snapshot: gen-{} ({})", generation, info.storage.size);
        }
        Ok(())
    }

    async fn search(&self, config: &AppConfig, base: &str, args: &SearchArgs) -> AppResult<()> {
        let kb = Arc::new(self.open(config, base_config(config, base)?).await?);

        let mut retriever = Retriever::new(kb);
        if let Some(top_k) = args.top_k {
            retriever = retriever.with_top_k(top_k);
        }
        if args.min_score.is_some() {
            retriever = retriever.with_min_score(args.min_score);
        }

        let chunks = retriever.search(&args.query).await?;

        if self.json {
            return print_json(&chunks);
        }
        if args.context {
            println!("{}", format_context(&chunks));
            return Ok(());
        }
        if chunks.is_empty() {
            println!("No relevant chunks found");
            return Ok(());
        }
        for (i, chunk) in chunks.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} #{}",
                i + 1,
                chunk.score,
                chunk.document_name,
                chunk.position
            );
            println!("   {}", snippet(&chunk.chunk_text));
        }
        Ok(())
    }

    async fn show(&self, config: &AppConfig, base: &str, args: &ShowArgs) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;

        if args.text {
            print!("{}", kb.raw_text(&args.name).await?);
            return Ok(());
        }

        let record = kb
            .document(&args.name)
            .await
            .ok_or_else(|| AppError::Knowledge(format!("document '{}' not found", args.name)))?;

        if self.json {
            return print_json(&serde_json::json!({
                "name": record.name,
                "format": record.format,
                "chunks": record.chunk_count,
                "chunkIds": record.chunk_ids(),
                "sizeBytes": record.size_bytes,
                "contentHash": record.content_hash,
                "ingestedAt": record.ingested_at,
                "imagesFound": record.images_found,
                "imagesRecognized": record.images_recognized,
                "status": record.status,
            }));
        }
        println!("Document: {}", record.name);
        println!("  Format: {}", record.format.as_str());
        println!("  Size: {} bytes", record.size_bytes);
        println!("  Chunks: {}", record.chunk_count);
        println!(
            "  Images: {} found, {} recognized",
            record.images_found, record.images_recognized
        );
        println!("  Added: {}", record.ingested_at.to_rfc3339());
        println!("  SHA-256: {}", record.content_hash);
        Ok(())
    }

    async fn reset(&self, config: &AppConfig, base: &str, args: &ResetArgs) -> AppResult<()> {
        if !args.yes {
            return Err(AppError::Other(format!(
                "Refusing to reset '{}' without --yes",
                base
            )));
        }

        let kb = self.open(config, base_config(config, base)?).await?;
        kb.reset().await?;
        println!("Knowledge base '{}' reset", base);
        Ok(())
    }

    async fn backup(&self, config: &AppConfig, base: &str, args: &BackupArgs) -> AppResult<()> {
        let kb = self.open(config, base_config(config, base)?).await?;
        let path = kb.backup(&args.name).await?;

        if self.json {
            return print_json(&serde_json::json!({ "base": base, "backup": path }));
        }
        println!("Backed up '{}' to {}", base, path.display());
        Ok(())
    }

    /// Open a base and load its snapshot.
    async fn open(&self, config: &AppConfig, kb_config: KnowledgeBaseConfig) -> AppResult<KnowledgeBase> {
        let kb = self.assemble(config, kb_config)?;
        kb.load().await?;
        Ok(kb)
    }

    /// Open a base without reading its snapshot.
    fn assemble(&self, config: &AppConfig, kb_config: KnowledgeBaseConfig) -> AppResult<KnowledgeBase> {
        let kb = KnowledgeBase::with_config(&config.workspace, kb_config)?;
        if self.json {
            return Ok(kb);
        }
        Ok(kb.with_progress(ProgressReporter::new(Arc::new(|event: ProgressEvent| {
            eprintln!("{}", event.format_simple());
        }))))
    }
}

/// The base's stored config with the workspace embedding overrides applied.
fn base_config(config: &AppConfig, base: &str) -> AppResult<KnowledgeBaseConfig> {
    Ok(load_config(&config.workspace, base)?.with_embedding_overrides(
        config.embedding_provider.as_deref(),
        config.embedding_model.as_deref(),
    ))
}

fn print_report(report: &IngestReport) {
    if let Some(plan) = &report.chunk_plan {
        println!(
            "  Chunk size {} (overlap {}), average length {:.0} chars",
            plan.chunk_size, plan.overlap, plan.avg_effective_len
        );
    }
    for doc in &report.succeeded {
        println!(
            "  + {} ({} chunks{})",
            doc.name,
            doc.chunk_count,
            if doc.images_found > 0 {
                format!(", OCR {}/{} images", doc.images_recognized, doc.images_found)
            } else {
                String::new()
            }
        );
    }
    for failed in &report.failed {
        println!("  - {}: {}", failed.name, failed.reason);
    }
    println!(
        "  {} chunks added, {} total, {:.2}s",
        report.chunks_added, report.total_chunks, report.duration_secs
    );
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
