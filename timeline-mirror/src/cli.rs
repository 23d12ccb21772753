///
/// This module implements the CLI interface for timeline-mirror: command parsing,
/// argument validation, the async entrypoint and the user-visible report.
///
/// All retrieval logic (walker, resume lookup, store gateway, fleet) lives in the
/// [`timeline-mirror-core`] crate. This module wires the concrete HTTP provider
/// and JSON-lines store into it.
///
/// ## How To Use
/// - For command-line users: `timeline-mirror sync --config mirror.yaml [--feed alice]...`
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`timeline-mirror-core`]: ../../timeline_mirror_core/
use crate::file_store::JsonlStore;
use crate::load_config::load_config;
use crate::provider::HttpTimelineClient;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use timeline_mirror_core::contract::FeedIdentity;
use timeline_mirror_core::fleet::{launch, FeedOutcome, FleetReport};
use timeline_mirror_core::synchronise::{SyncContext, SyncMode};

/// CLI for timeline-mirror: keep local copies of remote timelines up to date.
#[derive(Parser)]
#[clap(
    name = "timeline-mirror",
    version,
    about = "Incrementally mirror paginated, rate-limited timelines into a local document store"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring every tracked feed up to date using the given config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Feed to synchronise (repeatable); replaces the feeds listed in the config
        #[clap(long)]
        feed: Vec<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, feed } => {
            let config = load_config(config)?;
            let feeds = select_feeds(feed, &config.feeds)?;
            config.sync.trace_loaded();
            tracing::info!(command = "sync", feeds = feeds.len(), "Starting synchronisation process");

            let provider = HttpTimelineClient::new(
                config.provider.base_url.clone(),
                config.provider.timeout(),
                config.credentials.clone(),
                config.sync.id_field.clone(),
            )?;
            let store = JsonlStore::new(&config.store.connection, config.sync.id_field.clone());
            let ctx = Arc::new(SyncContext::new(provider, store, config.sync.clone()));

            let handle = launch(Arc::clone(&ctx), feeds);
            let cancel = handle.cancellation_token();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!(command = "sync", "Interrupt received; cancelling feed units");
                    cancel.cancel();
                }
            });

            let report = handle.join().await;
            interrupt.abort();
            if let Err(e) = ctx.gateway.close().await {
                tracing::warn!(error = %e, "Closing the store failed");
            }

            print!("{}", render_report(&report));
            if report.all_completed() {
                tracing::info!(command = "sync", run_id = %report.run_id, "Synchronisation complete");
                Ok(())
            } else {
                let unfinished = report.outcomes.len() - report.completed().count();
                tracing::error!(command = "sync", run_id = %report.run_id, unfinished, "Synchronisation incomplete");
                Err(anyhow::anyhow!(
                    "{unfinished} of {} feeds did not complete",
                    report.outcomes.len()
                ))
            }
        }
    }
}

/// Feeds given on the command line win over the config file.
pub fn select_feeds(cli_feeds: Vec<String>, configured: &[FeedIdentity]) -> Result<Vec<FeedIdentity>> {
    let feeds: Vec<FeedIdentity> = if cli_feeds.is_empty() {
        configured.to_vec()
    } else {
        cli_feeds.into_iter().map(FeedIdentity::from).collect()
    };
    if feeds.is_empty() {
        anyhow::bail!("No feeds to synchronise: list them under `feeds:` or pass --feed");
    }
    Ok(feeds)
}

pub fn render_report(report: &FleetReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Synchronise report (run {})", report.run_id);
    for (feed, outcome) in &report.outcomes {
        let _ = match outcome {
            FeedOutcome::Completed(r) => {
                let mode = match r.mode {
                    SyncMode::FirstSync => "first sync".to_string(),
                    SyncMode::Incremental { since } => format!("since {since}"),
                };
                writeln!(
                    out,
                    "  {feed}: completed ({mode}), {} written, {} already present, {} pauses",
                    r.items_written, r.duplicates_skipped, r.pauses
                )
            }
            FeedOutcome::Failed(e) => writeln!(out, "  {feed}: failed: {e}"),
            FeedOutcome::Cancelled => writeln!(out, "  {feed}: cancelled"),
            FeedOutcome::Panicked(msg) => writeln!(out, "  {feed}: panicked: {msg}"),
        };
    }
    let _ = writeln!(out, "Total items written: {}", report.items_written());
    out
}
