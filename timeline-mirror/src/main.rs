use anyhow::Result;
use clap::Parser;
use timeline_mirror::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may come from a .env next to the config.
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries only the per-feed report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "timeline-mirror starting");

    run(cli).await.inspect_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "timeline-mirror failed");
    })
}
