//! # walker: pausing, resumable page walk over one feed
//!
//! [`CursorWalker`] yields the items of one feed that are strictly newer than a
//! lower-bound id, in the order the provider returns them. It is an explicit
//! state machine:
//!
//! | state       | event                          | next state                          |
//! |-------------|--------------------------------|-------------------------------------|
//! | `Fetching`  | page with a continuation       | `Fetching { cursor }`               |
//! | `Fetching`  | page without a continuation    | `Exhausted`                         |
//! | `Fetching`  | `RateLimited` / `Transient`    | `Paused { reason }`                 |
//! | `Fetching`  | `Rejected`                     | walk ends with [`WalkError`]        |
//! | `Paused`    | recovery window elapsed        | `Fetching { cursor: None }`, bounds narrowed |
//! | `Exhausted` | -                              | `Exhausted`                         |
//!
//! On resume the upper bound becomes the id of the last yielded item, so the
//! fresh walk starts right below it. Both bounds are exclusive; items outside
//! them are dropped, which keeps the boundary item from being yielded twice.
//!
//! The walker never touches the store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::{FeedIdentity, FeedProvider, Item, ItemId, PageRequest, ProviderError};
use crate::rate_budget::RateBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    RateLimited,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkState {
    Fetching { cursor: Option<String> },
    Paused { reason: PauseReason },
    Exhausted,
}

impl WalkState {
    /// Transition after a page arrived.
    pub fn after_page(next_cursor: Option<String>) -> Self {
        match next_cursor {
            Some(cursor) => WalkState::Fetching {
                cursor: Some(cursor),
            },
            None => WalkState::Exhausted,
        }
    }

    /// Transition after a provider error. `None` means the walk cannot continue.
    pub fn after_error(error: &ProviderError) -> Option<Self> {
        match error {
            ProviderError::RateLimited => Some(WalkState::Paused {
                reason: PauseReason::RateLimited,
            }),
            ProviderError::Transient(_) => Some(WalkState::Paused {
                reason: PauseReason::Transient,
            }),
            ProviderError::Rejected(_) => None,
        }
    }
}

/// Bounds of the fresh walk started after a pause: the last yielded id, if any,
/// becomes the exclusive upper bound; otherwise the previous bounds stay.
pub fn resume_bounds(
    lower: Option<ItemId>,
    upper: Option<ItemId>,
    last_yielded: Option<ItemId>,
) -> (Option<ItemId>, Option<ItemId>) {
    (lower, last_yielded.or(upper))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalkError {
    #[error("provider rejected feed {feed}: {reason}")]
    Rejected { feed: FeedIdentity, reason: String },
    #[error("walk cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct WalkSettings {
    pub page_size: u32,
    pub recovery_window: Duration,
}

pub struct CursorWalker<'a, P: ?Sized> {
    provider: &'a P,
    feed: FeedIdentity,
    lower: Option<ItemId>,
    upper: Option<ItemId>,
    last_yielded: Option<ItemId>,
    state: WalkState,
    buffer: VecDeque<Item>,
    settings: WalkSettings,
    budget: Option<Arc<RateBudget>>,
    cancel: CancellationToken,
    pauses: u32,
}

impl<'a, P> CursorWalker<'a, P>
where
    P: FeedProvider + ?Sized,
{
    pub fn new(
        provider: &'a P,
        feed: FeedIdentity,
        since: Option<ItemId>,
        settings: WalkSettings,
    ) -> Self {
        Self {
            provider,
            feed,
            lower: since,
            upper: None,
            last_yielded: None,
            state: WalkState::Fetching { cursor: None },
            buffer: VecDeque::new(),
            settings,
            budget: None,
            cancel: CancellationToken::new(),
            pauses: 0,
        }
    }

    pub fn with_budget(mut self, budget: Option<Arc<RateBudget>>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &WalkState {
        &self.state
    }

    /// Current `(lower, upper)` exclusive bounds.
    pub fn bounds(&self) -> (Option<ItemId>, Option<ItemId>) {
        (self.lower, self.upper)
    }

    pub fn last_yielded(&self) -> Option<ItemId> {
        self.last_yielded
    }

    pub fn pauses(&self) -> u32 {
        self.pauses
    }

    /// Next item, `Ok(None)` once the provider reported end-of-data.
    pub async fn next(&mut self) -> Result<Option<Item>, WalkError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.last_yielded = Some(item.id);
                return Ok(Some(item));
            }

            match self.state.clone() {
                WalkState::Exhausted => return Ok(None),
                WalkState::Paused { reason } => self.pause(reason).await?,
                WalkState::Fetching { cursor } => self.fetch(cursor).await?,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Item, WalkError>> + 'a
    where
        P: 'a,
    {
        stream::try_unfold(self, |mut walker| async move {
            Ok(walker.next().await?.map(|item| (item, walker)))
        })
    }

    async fn fetch(&mut self, cursor: Option<String>) -> Result<(), WalkError> {
        if self.cancel.is_cancelled() {
            return Err(WalkError::Cancelled);
        }
        if let Some(budget) = &self.budget {
            if !budget.acquire(&self.cancel).await {
                return Err(WalkError::Cancelled);
            }
        }

        let request = PageRequest {
            feed: self.feed.clone(),
            since_id: self.lower,
            max_id: self.upper,
            cursor,
            page_size: self.settings.page_size,
        };
        debug!(feed = %self.feed, ?request, "[WALK] Fetching page");

        match self.provider.fetch_page(request).await {
            Ok(page) => {
                let received = page.items.len();
                let (lower, upper) = (self.lower, self.upper);
                self.buffer.extend(
                    page.items
                        .into_iter()
                        .filter(|item| within(item.id, lower, upper)),
                );
                if self.buffer.len() < received {
                    debug!(
                        feed = %self.feed,
                        dropped = received - self.buffer.len(),
                        "[WALK] Dropped items outside the requested bounds"
                    );
                }
                self.state = WalkState::after_page(page.next_cursor);
                if self.state == WalkState::Exhausted {
                    info!(feed = %self.feed, "[WALK] All items of feed retrieved");
                }
                Ok(())
            }
            Err(error) => match WalkState::after_error(&error) {
                Some(next) => {
                    warn!(
                        feed = %self.feed,
                        error = %error,
                        last_yielded = ?self.last_yielded,
                        window_secs = self.settings.recovery_window.as_secs(),
                        "[WALK] Provider unavailable; pausing"
                    );
                    self.state = next;
                    Ok(())
                }
                None => Err(WalkError::Rejected {
                    feed: self.feed.clone(),
                    reason: error.to_string(),
                }),
            },
        }
    }

    async fn pause(&mut self, reason: PauseReason) -> Result<(), WalkError> {
        self.pauses += 1;
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(WalkError::Cancelled),
            _ = tokio::time::sleep(self.settings.recovery_window) => {}
        }

        let (lower, upper) = resume_bounds(self.lower, self.upper, self.last_yielded);
        self.lower = lower;
        self.upper = upper;
        self.state = WalkState::Fetching { cursor: None };
        info!(
            feed = %self.feed,
            ?reason,
            since_id = ?self.lower,
            max_id = ?self.upper,
            "[WALK] Resuming after pause"
        );
        Ok(())
    }
}

fn within(id: ItemId, lower: Option<ItemId>, upper: Option<ItemId>) -> bool {
    lower.map_or(true, |l| id > l) && upper.map_or(true, |u| id < u)
}
