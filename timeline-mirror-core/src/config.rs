use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::FeedIdentity;

/// Everything a synchronisation run needs besides the provider and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Database holding one collection per feed.
    pub database: String,
    /// Prepended to the feed identity to form the collection name.
    pub collection_prefix: String,
    /// Payload field holding the item id.
    pub id_field: String,
    /// When set, the resume lookup only considers documents whose `owner_field`
    /// equals the feed identity (e.g. `user.screen_name`).
    pub owner_field: Option<String>,
    pub page_size: u32,
    /// How long to wait after rate-limit exhaustion or a transient provider error.
    /// Defaults to the provider's full rolling window.
    pub recovery_window_secs: u64,
    pub store_retry: RetryPolicy,
    pub rate_budget: Option<RateBudgetConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: "timeline_mirror".to_string(),
            collection_prefix: String::new(),
            id_field: "id".to_string(),
            owner_field: None,
            page_size: 200,
            recovery_window_secs: 15 * 60,
            store_retry: RetryPolicy::default(),
            rate_budget: None,
        }
    }
}

impl SyncConfig {
    pub fn collection_for(&self, feed: &FeedIdentity) -> String {
        format!("{}{}", self.collection_prefix, feed)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            database = %self.database,
            page_size = self.page_size,
            recovery_window_secs = self.recovery_window_secs,
            store_max_attempts = self.store_retry.max_attempts,
            rate_budget = self.rate_budget.is_some(),
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// Bounded reconnect-and-retry policy for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Request budget shared by every feed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    /// Requests permitted per window.
    pub requests: usize,
    pub window_secs: u64,
}

impl RateBudgetConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}
