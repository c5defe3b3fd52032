//! corpus-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the file writer flushing until the process exits.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn file_writer(log_file: &Path) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let dir = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = log_file.file_name()?;
    if std::fs::create_dir_all(dir).is_err() {
        return None;
    }

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = corpus_forge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    let log_file = corpus_forge::cli::resolve_log_file(&cli.config);

    let file_layer = file_writer(&log_file).map(|writer| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    corpus_forge::cli::run_with_cli(cli).await
}
