//! Command-line interface for corpus-forge.
//!
//! Provides commands for document generation and upload, corpus status,
//! cleanup, log inspection and the health server.

mod commands;
mod progress;

pub use commands::{parse_cli, resolve_log_file, run, run_with_cli, Cli, Commands};
pub use progress::ProgressObserver;
