//! # synchronise: one feed, end to end
//!
//! [`synchronise_feed`] runs a full pass over one feed:
//!   1. look up the newest stored item id ([`resume::latest_item_id`])
//!   2. walk the feed from there ([`CursorWalker`])
//!   3. write every item through the [`StoreGateway`] as soon as it arrives
//!
//! Writes are streamed, not batched: a crash mid-run loses at most the item in
//! flight. Duplicate writes are no-ops, so re-running a feed is always safe.
//!
//! [`SyncContext`] bundles what every feed unit shares: the provider client,
//! the gateway, the config, the optional rate budget and the cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::contract::{DocumentStore, FeedIdentity, FeedProvider, ItemId};
use crate::gateway::{GatewayError, StoreGateway, WriteOutcome};
use crate::rate_budget::RateBudget;
use crate::resume;
use crate::walker::{CursorWalker, WalkError, WalkSettings};

pub struct SyncContext<P, S> {
    pub provider: P,
    pub gateway: StoreGateway<S>,
    pub config: SyncConfig,
    pub budget: Option<Arc<RateBudget>>,
    pub cancel: CancellationToken,
}

impl<P, S> SyncContext<P, S>
where
    P: FeedProvider,
    S: DocumentStore,
{
    /// Builds the context. If the config declares a rate budget, its refill task is
    /// started, so this must run inside a tokio runtime in that case.
    pub fn new(provider: P, store: S, config: SyncConfig) -> Self {
        let cancel = CancellationToken::new();
        let gateway = StoreGateway::new(store, config.database.clone(), config.store_retry)
            .with_cancellation(cancel.clone());
        let budget = config.rate_budget.as_ref().map(RateBudget::from_config);
        Self {
            provider,
            gateway,
            config,
            budget,
            cancel,
        }
    }

    pub fn walk_settings(&self) -> WalkSettings {
        WalkSettings {
            page_size: self.config.page_size,
            recovery_window: self.config.recovery_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    FirstSync,
    Incremental { since: ItemId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub feed: FeedIdentity,
    pub mode: SyncMode,
    pub items_written: u64,
    pub duplicates_skipped: u64,
    pub pauses: u32,
    pub newest_written: Option<ItemId>,
    pub oldest_written: Option<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("resume lookup failed: {0}")]
    ResumeLookup(#[source] GatewayError),
    #[error("writing item {id} failed: {source}")]
    Write { id: ItemId, source: GatewayError },
    #[error(transparent)]
    Walk(WalkError),
    #[error("synchronisation cancelled")]
    Cancelled,
}

impl From<WalkError> for SyncError {
    fn from(e: WalkError) -> Self {
        match e {
            WalkError::Cancelled => SyncError::Cancelled,
            other => SyncError::Walk(other),
        }
    }
}

/// Entrypoint: bring one feed's stored collection up to date.
pub async fn synchronise_feed<P, S>(
    ctx: &SyncContext<P, S>,
    feed: &FeedIdentity,
) -> Result<FeedReport, SyncError>
where
    P: FeedProvider,
    S: DocumentStore,
{
    let collection = ctx.config.collection_for(feed);

    let since = match resume::latest_item_id(&ctx.gateway, &ctx.config, feed).await {
        Ok(since) => since,
        Err(GatewayError::Cancelled) => return Err(SyncError::Cancelled),
        Err(e) => {
            error!(feed = %feed, error = %e, "[SYNC][ERROR] Resume lookup failed");
            return Err(SyncError::ResumeLookup(e));
        }
    };

    let mode = match since {
        Some(since) => {
            info!(feed = %feed, since_id = %since, "[SYNC] Updating items of feed");
            SyncMode::Incremental { since }
        }
        None => {
            info!(feed = %feed, "[SYNC] Extracting items from feed (first sync)");
            SyncMode::FirstSync
        }
    };

    let mut walker = CursorWalker::new(&ctx.provider, feed.clone(), since, ctx.walk_settings())
        .with_budget(ctx.budget.clone())
        .with_cancellation(ctx.cancel.clone());

    let mut report = FeedReport {
        feed: feed.clone(),
        mode,
        items_written: 0,
        duplicates_skipped: 0,
        pauses: 0,
        newest_written: None,
        oldest_written: None,
    };

    while let Some(item) = walker.next().await? {
        let id = item.id;
        match ctx
            .gateway
            .write(&collection, item.into_document(&ctx.config.id_field))
            .await
        {
            Ok(WriteOutcome::Inserted) => {
                report.items_written += 1;
                report.newest_written = report.newest_written.max(Some(id));
                report.oldest_written = Some(report.oldest_written.map_or(id, |o| o.min(id)));
            }
            Ok(WriteOutcome::AlreadyPresent) => {
                debug!(feed = %feed, item_id = %id, "[SYNC] Item already stored; skipped");
                report.duplicates_skipped += 1;
            }
            Err(GatewayError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => {
                error!(feed = %feed, item_id = %id, error = %e, "[SYNC][ERROR] Write failed");
                return Err(SyncError::Write { id, source: e });
            }
        }
    }

    report.pauses = walker.pauses();
    info!(
        feed = %feed,
        items_written = report.items_written,
        duplicates_skipped = report.duplicates_skipped,
        pauses = report.pauses,
        "[SYNC] Feed caught up"
    );
    Ok(report)
}
