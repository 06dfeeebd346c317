//! docsage CLI
//!
//! Main entry point for the docsage command-line tool: builds, queries and
//! maintains local document knowledge bases.

mod commands;

use clap::{Parser, Subcommand};
use commands::KbCommand;
use docsage_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// docsage - private knowledge bases from office documents
#[derive(Parser, Debug)]
#[command(name = "docsage")]
#[command(about = "Private knowledge bases from PDF, DOCX and text documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "DOCSAGE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOCSAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Embedding provider (trigram, ollama)
    #[arg(long, global = true, env = "DOCSAGE_EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Embedding model identifier
    #[arg(long, global = true, env = "DOCSAGE_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Knowledge base management
    Kb(KbCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load()?;

    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.embedding_provider,
        cli.embedding_model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.log_json,
    );
    config.validate()?;

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::info!("docsage starting");
    tracing::debug!("Workspace: {:?}", config.workspace);

    config.ensure_docsage_dir()?;

    let command_name = match &cli.command {
        Commands::Kb(_) => "kb",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Kb(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
