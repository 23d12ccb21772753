//! # fleet: many feeds, one task each
//!
//! [`launch`] spawns one tokio task per feed identity, all sharing one
//! [`SyncContext`]. Units keep their own progress and never wait on each other:
//! a failed or panicking unit is recorded and its siblings carry on.
//!
//! The returned [`FleetHandle`] exposes each feed's live [`FeedStatus`], can
//! cancel every unit cooperatively, and joins into a [`FleetReport`].

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::contract::{DocumentStore, FeedIdentity, FeedProvider};
use crate::synchronise::{synchronise_feed, FeedReport, SyncContext, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Running,
    Completed { items_written: u64 },
    Failed { error: String },
    Cancelled,
}

impl FeedStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, FeedStatus::Running)
    }
}

#[derive(Debug)]
pub enum FeedOutcome {
    Completed(FeedReport),
    Failed(SyncError),
    Cancelled,
    Panicked(String),
}

impl FeedOutcome {
    fn status(&self) -> FeedStatus {
        match self {
            FeedOutcome::Completed(report) => FeedStatus::Completed {
                items_written: report.items_written,
            },
            FeedOutcome::Failed(e) => FeedStatus::Failed {
                error: e.to_string(),
            },
            FeedOutcome::Cancelled => FeedStatus::Cancelled,
            FeedOutcome::Panicked(msg) => FeedStatus::Failed {
                error: format!("panicked: {msg}"),
            },
        }
    }
}

#[derive(Debug)]
pub struct FleetReport {
    pub run_id: Uuid,
    pub outcomes: BTreeMap<FeedIdentity, FeedOutcome>,
}

impl FleetReport {
    pub fn completed(&self) -> impl Iterator<Item = &FeedReport> {
        self.outcomes.values().filter_map(|o| match o {
            FeedOutcome::Completed(report) => Some(report),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &FeedIdentity> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FeedOutcome::Failed(_) | FeedOutcome::Panicked(_)))
            .map(|(feed, _)| feed)
    }

    pub fn all_completed(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, FeedOutcome::Completed(_)))
    }

    pub fn items_written(&self) -> u64 {
        self.completed().map(|r| r.items_written).sum()
    }
}

struct FeedUnit {
    feed: FeedIdentity,
    status: watch::Receiver<FeedStatus>,
    task: JoinHandle<FeedOutcome>,
}

pub struct FleetHandle {
    run_id: Uuid,
    units: Vec<FeedUnit>,
    cancel: CancellationToken,
}

/// Spawns one unit per distinct feed identity. Must be called within a tokio runtime.
pub fn launch<P, S, I>(ctx: Arc<SyncContext<P, S>>, feeds: I) -> FleetHandle
where
    P: FeedProvider + 'static,
    S: DocumentStore + 'static,
    I: IntoIterator<Item = FeedIdentity>,
{
    let run_id = Uuid::new_v4();
    let mut seen = BTreeSet::new();
    let mut units = Vec::new();

    for feed in feeds {
        if !seen.insert(feed.clone()) {
            warn!(feed = %feed, "[FLEET] Feed listed more than once; launching it once");
            continue;
        }

        let (status_tx, status_rx) = watch::channel(FeedStatus::Running);
        let unit_ctx = Arc::clone(&ctx);
        let unit_feed = feed.clone();
        let span = tracing::info_span!("feed_unit", run_id = %run_id, feed = %feed);

        let task = tokio::spawn(
            async move {
                info!("[FLEET] Starting feed unit");
                let result = AssertUnwindSafe(synchronise_feed(&unit_ctx, &unit_feed))
                    .catch_unwind()
                    .await;
                let outcome = match result {
                    Ok(Ok(report)) => FeedOutcome::Completed(report),
                    Ok(Err(SyncError::Cancelled)) => FeedOutcome::Cancelled,
                    Ok(Err(e)) => FeedOutcome::Failed(e),
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        error!(panic = %msg, "[FLEET][ERROR] Feed unit panicked");
                        FeedOutcome::Panicked(msg)
                    }
                };
                status_tx.send_replace(outcome.status());
                info!(status = ?outcome.status(), "[FLEET] Exiting feed unit");
                outcome
            }
            .instrument(span),
        );

        units.push(FeedUnit {
            feed,
            status: status_rx,
            task,
        });
    }

    info!(run_id = %run_id, feeds = units.len(), "[FLEET] Launched feed units");
    FleetHandle {
        run_id,
        units,
        cancel: ctx.cancel.clone(),
    }
}

/// Launches every feed and waits for all of them.
pub async fn synchronise_fleet<P, S, I>(ctx: Arc<SyncContext<P, S>>, feeds: I) -> FleetReport
where
    P: FeedProvider + 'static,
    S: DocumentStore + 'static,
    I: IntoIterator<Item = FeedIdentity>,
{
    launch(ctx, feeds).join().await
}

impl FleetHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self, feed: &FeedIdentity) -> Option<FeedStatus> {
        self.units
            .iter()
            .find(|u| &u.feed == feed)
            .map(|u| u.status.borrow().clone())
    }

    pub fn statuses(&self) -> Vec<(FeedIdentity, FeedStatus)> {
        self.units
            .iter()
            .map(|u| (u.feed.clone(), u.status.borrow().clone()))
            .collect()
    }

    /// Asks every unit to stop at its next suspension point or between items.
    pub fn cancel(&self) {
        info!(run_id = %self.run_id, "[FLEET] Cancelling feed units");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> FleetReport {
        let mut outcomes = BTreeMap::new();
        for unit in self.units {
            let outcome = match unit.task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => FeedOutcome::Cancelled,
                Err(e) => FeedOutcome::Panicked(e.to_string()),
            };
            outcomes.insert(unit.feed, outcome);
        }

        let report = FleetReport {
            run_id: self.run_id,
            outcomes,
        };
        info!(
            run_id = %report.run_id,
            completed = report.completed().count(),
            failed = report.failed().count(),
            items_written = report.items_written(),
            "[FLEET] All feed units finished"
        );
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
