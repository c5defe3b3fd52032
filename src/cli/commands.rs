//! CLI command definitions for corpus-forge.
//!
//! Each subcommand loads the layered configuration, builds a
//! [`CorpusManager`] and renders its reports either as text or JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use super::progress::{confirm, tail_lines, ProgressObserver};
use crate::batch::CancelHandle;
use crate::config::{ManagerConfig, DEFAULT_CONFIG_FILE};
use crate::corpus::CorpusStatus;
use crate::documents::{GenerationReport, UploadReport};
use crate::manager::{CleanupOptions, CleanupReport, CorpusManager, StatusOverview};

/// Lines printed by `logs` when `-n` is not given.
const DEFAULT_LOG_LINES: usize = 50;

/// Generates hotel knowledge-base documents and keeps a managed corpus in sync.
#[derive(Parser)]
#[command(name = "corpus-forge")]
#[command(about = "Generate knowledge-base documents with an LLM and upload them to a managed corpus")]
#[command(version)]
#[command(
    long_about = "corpus-forge turns prompt templates into text documents through an OpenAI-compatible \
chat completion API, then uploads them into a managed retrieval corpus.\n\nExample usage:\n  \
corpus-forge generate --yes\n  corpus-forge status --json\n  corpus-forge cleanup --execute"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// JSON configuration file; missing files fall back to defaults.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate missing documents and upload them to the corpus.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Show local and remote corpus status.
    Status(StatusArgs),

    /// Delete generated documents and the remote corpus.
    ///
    /// Runs as a dry run unless --execute is given.
    Cleanup(CleanupArgs),

    /// Print the last lines of the log file.
    Logs(LogsArgs),

    /// Serve the health and status endpoints.
    Serve(ServeArgs),
}

/// Arguments for `corpus-forge generate`.
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Only generate documents; do not touch the corpus.
    #[arg(long)]
    pub no_upload: bool,

    /// Print the reports as JSON instead of progress and text.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `corpus-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the status as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `corpus-forge cleanup`.
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Actually delete; without this flag nothing is removed.
    #[arg(long)]
    pub execute: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Leave the remote corpus untouched.
    #[arg(long)]
    pub local_only: bool,
}

/// Arguments for `corpus-forge logs`.
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Number of lines to print.
    #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
    pub lines: usize,
}

/// Arguments for `corpus-forge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address; defaults to the configured host.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port; defaults to the configured port.
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Combined output of `generate`.
#[derive(Debug, Serialize)]
struct GenerateOutput {
    generation: GenerationReport,
    upload: Option<UploadReport>,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Generate(args) => run_generate_command(&cli.config, args).await,
        Commands::Status(args) => run_status_command(&cli.config, args).await,
        Commands::Cleanup(args) => run_cleanup_command(&cli.config, args).await,
        Commands::Logs(args) => run_logs_command(&cli.config, args),
        Commands::Serve(args) => run_serve_command(&cli.config, args).await,
    }
}

/// Log file named by the configuration, without requiring it to validate.
///
/// Logging starts before any command runs, so an incomplete configuration
/// must still yield a log destination.
pub fn resolve_log_file(config_path: &Path) -> PathBuf {
    let mut config = ManagerConfig::from_file(config_path).unwrap_or_default();
    if config.apply_env().is_err() {
        return ManagerConfig::default().log_file;
    }
    config.log_file
}

fn load_manager(config_path: &Path) -> anyhow::Result<CorpusManager> {
    let config = ManagerConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    CorpusManager::from_config(config).context("Failed to initialize corpus manager")
}

/// Cancels `cancel` on the first Ctrl-C.
fn cancel_on_ctrl_c(cancel: &CancelHandle) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining work");
            cancel.cancel();
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", output);
    Ok(())
}

// ============================================================================
// generate
// ============================================================================

async fn run_generate_command(config_path: &Path, args: GenerateArgs) -> anyhow::Result<()> {
    let manager = load_manager(config_path)?;
    let plan = manager.plan_generation()?;

    if !args.yes {
        let question = format!(
            "Generate {} of {} documents into {}?",
            plan.pending,
            plan.total_templates,
            manager.config().output_dir.display()
        );
        if !confirm(&question)? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let cancel = CancelHandle::new();
    cancel_on_ctrl_c(&cancel);

    let progress = ProgressObserver::new("generate", !args.json);
    let generation = manager.generate_documents(&progress, &cancel).await?;
    progress.finish();
    if !args.json {
        print_generation(&generation);
    }

    let upload = if args.no_upload {
        None
    } else if !generation.is_complete() {
        warn!(failed = generation.failed(), "Skipping upload because generation had failures");
        None
    } else if cancel.is_cancelled() {
        None
    } else {
        let corpus = manager.ensure_corpus().await?;
        let progress = ProgressObserver::new("upload", !args.json);
        let report = manager.upload_documents(&corpus, &progress, &cancel).await?;
        progress.finish();
        if !args.json {
            print_upload(&report);
        }
        Some(report)
    };

    let failed = generation.failed() + upload.as_ref().map_or(0, UploadReport::failed);
    if args.json {
        print_json(&GenerateOutput { generation, upload })?;
    }

    if failed > 0 {
        anyhow::bail!("{} document(s) failed", failed);
    }
    Ok(())
}

fn print_generation(report: &GenerationReport) {
    println!();
    println!("Generation");
    println!("  Templates:        {}", report.total_templates);
    println!("  Already present:  {}", report.skipped_existing.len());
    println!("  Generated:        {}", report.generated());
    println!("  Failed:           {}", report.failed());
    if let Some(ref batch) = report.batch {
        println!("  Duration:         {} ms", batch.elapsed_ms);
        for item in &batch.items {
            if let Some(ref error) = item.error {
                println!("    ✗ {} ({} attempts): {}", item.title, item.attempts, error);
            }
        }
    }
}

fn print_upload(report: &UploadReport) {
    println!();
    println!("Upload to {}", report.corpus);
    println!("  Local documents:  {}", report.candidates);
    println!("  Already present:  {}", report.already_present.len());
    println!("  Uploaded:         {}", report.uploaded());
    println!("  Failed:           {}", report.failed());
}

// ============================================================================
// status
// ============================================================================

async fn run_status_command(config_path: &Path, args: StatusArgs) -> anyhow::Result<()> {
    let manager = load_manager(config_path)?;
    let overview = manager.status_overview().await?;

    if args.json {
        return print_json(&overview);
    }
    print_status(&overview);
    Ok(())
}

fn status_label(status: CorpusStatus) -> &'static str {
    match status {
        CorpusStatus::NotFound => "❌ not found",
        CorpusStatus::Empty => "📭 empty",
        CorpusStatus::Partial => "⚠️  partial",
        CorpusStatus::Complete => "✅ complete",
        CorpusStatus::Error => "💥 error",
    }
}

fn print_status(overview: &StatusOverview) {
    println!("Corpus:            {}", overview.display_name);
    println!("Status:            {}", status_label(overview.status));
    println!(
        "Remote name:       {}",
        overview.corpus_name.as_deref().unwrap_or("-")
    );
    println!("Local documents:   {}", overview.local_documents);
    match overview.remote_documents {
        Some(count) => println!("Remote documents:  {}", count),
        None => println!("Remote documents:  -"),
    }
    println!("Expected:          {}", overview.expected_documents);
    if let Some(created) = overview.created_at {
        println!("Created:           {}", created.to_rfc3339());
    }
    if let Some(updated) = overview.last_updated {
        println!("Last updated:      {}", updated.to_rfc3339());
    }
}

// ============================================================================
// cleanup
// ============================================================================

async fn run_cleanup_command(config_path: &Path, args: CleanupArgs) -> anyhow::Result<()> {
    let manager = load_manager(config_path)?;
    let options = CleanupOptions {
        dry_run: !args.execute,
        local: true,
        remote: !args.local_only,
    };

    if args.execute && !args.yes {
        let scope = if options.remote {
            "local documents and the remote corpus"
        } else {
            "local documents"
        };
        if !confirm(&format!("Permanently delete {}?", scope))? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let report = manager.cleanup(options).await?;
    print_cleanup(&report);
    Ok(())
}

fn print_cleanup(report: &CleanupReport) {
    if report.dry_run {
        println!("Dry run: nothing was deleted (use --execute to delete)");
        println!("  Local documents:  {}", report.local_files.len());
        for path in &report.local_files {
            println!("    {}", path.display());
        }
        match report.remote_corpus {
            Some(ref name) => println!("  Remote corpus:    {}", name),
            None => println!("  Remote corpus:    -"),
        }
        return;
    }

    println!("Deleted {} local document(s)", report.local_deleted);
    if report.remote_deleted {
        if let Some(ref name) = report.remote_corpus {
            println!("Deleted remote corpus {}", name);
        }
    }
}

// ============================================================================
// logs
// ============================================================================

fn run_logs_command(config_path: &Path, args: LogsArgs) -> anyhow::Result<()> {
    let log_file = resolve_log_file(config_path);
    match tail_lines(&log_file, args.lines)
        .with_context(|| format!("Failed to read {}", log_file.display()))?
    {
        Some(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        None => println!("No log file found at {}", log_file.display()),
    }
    Ok(())
}

// ============================================================================
// serve
// ============================================================================

async fn run_serve_command(config_path: &Path, args: ServeArgs) -> anyhow::Result<()> {
    let manager = Arc::new(load_manager(config_path)?);
    let host = args
        .host
        .unwrap_or_else(|| manager.config().server.host.clone());
    let port = args.port.unwrap_or(manager.config().server.port);

    info!(%host, port, "Starting health server");
    crate::server::serve(manager, &host, port, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    })
    .await
}
