mod api;
mod cli;
mod logging;
mod model;
mod notify;
mod orchestrator;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;
mod validation;
mod view;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.is_tui();

    cli::run(args).await?;
    // Explicitly exit with code 0 in non-TUI modes so a pending stdin read cannot keep the process alive
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
