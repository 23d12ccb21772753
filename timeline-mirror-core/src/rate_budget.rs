//! Shared request budget: a counting semaphore refilled on a timer.
//!
//! Every feed unit acquires one permit before each provider request. Permits
//! consumed in one window come back when the next window starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RateBudgetConfig;

/// Shortest refill period; a zero window would stall the refill timer.
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

pub struct RateBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
    window: Duration,
    refill: JoinHandle<()>,
}

impl RateBudget {
    /// Starts the budget and its refill task. Must be called from within a tokio runtime.
    pub fn start(capacity: usize, window: Duration) -> Arc<Self> {
        let capacity = capacity.max(1);
        if window < MIN_WINDOW {
            tracing::warn!(window_ms = window.as_millis() as u64, "[BUDGET] Window too short, using 1ms");
        }
        let window = window.max(MIN_WINDOW);
        let permits = Arc::new(Semaphore::new(capacity));

        let refill_permits = Arc::clone(&permits);
        let refill = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + window, window);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let missing = capacity.saturating_sub(refill_permits.available_permits());
                if missing > 0 {
                    refill_permits.add_permits(missing);
                    tracing::debug!(refilled = missing, "[BUDGET] Rate window refilled");
                }
            }
        });

        Arc::new(Self {
            permits,
            capacity,
            window,
            refill,
        })
    }

    pub fn from_config(config: &RateBudgetConfig) -> Arc<Self> {
        Self::start(config.requests, config.window())
    }

    /// Waits for a permit and consumes it. Returns `false` if cancelled first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                // The semaphore is never closed.
                Err(_) => false,
            },
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Drop for RateBudget {
    fn drop(&mut self) {
        self.refill.abort();
    }
}
