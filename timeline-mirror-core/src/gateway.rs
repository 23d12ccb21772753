//! # gateway: resilient access to the document store
//!
//! [`StoreGateway`] wraps a [`DocumentStore`] with reconnect-and-retry:
//! a connectivity failure resets the connection and retries the exact same
//! operation, with exponential backoff, up to [`RetryPolicy::max_attempts`]
//! attempts. After that the gateway gives up with [`GatewayError::Unavailable`].
//!
//! Writes are idempotent: a duplicate-key rejection is reported as
//! [`WriteOutcome::AlreadyPresent`] rather than an error.

use std::future::Future;
use std::time::Duration;

use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::contract::{Document, DocumentStore, StoreError};
use crate::query::FindQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("store unavailable for collection {collection} after {attempts} attempts: {reason}")]
    Unavailable {
        collection: String,
        attempts: u32,
        reason: String,
    },
    #[error(transparent)]
    Fatal(StoreError),
    #[error("store operation cancelled")]
    Cancelled,
}

pub struct StoreGateway<S> {
    store: S,
    database: String,
    retry: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl<S> StoreGateway<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, database: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            database: database.into(),
            retry,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert one document into `collection`.
    pub async fn write(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteOutcome, GatewayError> {
        self.with_reconnect("insert_one", collection, || {
            let document = document.clone();
            async move {
                match self
                    .store
                    .insert_one(&self.database, collection, document)
                    .await
                {
                    Ok(()) => Ok(WriteOutcome::Inserted),
                    Err(StoreError::Duplicate(reason)) => {
                        debug!(collection, reason = %reason, "[STORE] Document already present");
                        Ok(WriteOutcome::AlreadyPresent)
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    pub async fn query(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, GatewayError> {
        self.with_reconnect("find", collection, || {
            self.store.find(&self.database, collection, query)
        })
        .await
    }

    pub async fn close(&self) -> Result<(), GatewayError> {
        info!(database = %self.database, "[STORE] Closing store connection");
        self.store.close().await.map_err(GatewayError::Fatal)
    }

    async fn with_reconnect<T, F, Fut>(
        &self,
        operation_name: &'static str,
        collection: &str,
        mut operation: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;
        let mut backoff = self.retry.initial_delay();

        loop {
            attempt += 1;
            if self.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Connectivity(reason)) => {
                    if attempt >= max_attempts {
                        error!(
                            operation = operation_name,
                            collection,
                            attempt,
                            error = %reason,
                            "[STORE][ERROR] Store operation exhausted retries"
                        );
                        return Err(GatewayError::Unavailable {
                            collection: collection.to_string(),
                            attempts: attempt,
                            reason,
                        });
                    }

                    warn!(
                        operation = operation_name,
                        collection,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %reason,
                        "[STORE] Connectivity failure; resetting connection and retrying"
                    );
                    if let Err(e) = self.store.reset().await {
                        warn!(error = %e, "[STORE] Connection reset failed");
                    }
                    self.sleep(backoff).await?;
                    backoff = next_backoff(backoff, self.retry.max_delay());
                }
                Err(e) => {
                    error!(
                        operation = operation_name,
                        collection,
                        error = %e,
                        "[STORE][ERROR] Store operation failed"
                    );
                    return Err(GatewayError::Fatal(e));
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    async fn sleep(&self, delay: Duration) -> Result<(), GatewayError> {
        if delay.is_zero() {
            yield_now().await;
            return Ok(());
        }

        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(GatewayError::Cancelled),
                _ = sleep(delay) => Ok(()),
            },
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return Duration::ZERO;
    }
    current.saturating_mul(2).min(max_backoff)
}
