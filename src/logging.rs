//! Tracing subscriber setup.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// `-v` count to a default filter; `RUST_LOG` wins when set.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "analysis_dashboard=warn",
        1 => "analysis_dashboard=info",
        2 => "analysis_dashboard=debug",
        _ => "analysis_dashboard=trace,reqwest=debug",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Log to stderr. Used by the text subcommands.
pub fn init_stderr(verbosity: u8) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")
}

/// Log to `path`, appending. The TUI owns the terminal, so nothing may go to stderr.
pub fn init_file(verbosity: u8, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter(verbosity))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")
}
