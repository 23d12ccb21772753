//! # contract: data model and the two external seams of the retrieval engine
//!
//! This module defines the plain data carried through a synchronisation run
//! ([`FeedIdentity`], [`ItemId`], [`Item`], [`PageRequest`], [`Page`]) and the
//! two traits the engine talks to:
//!
//! - [`FeedProvider`]: the remote, cursor-paginated, rate-limited timeline API.
//! - [`DocumentStore`]: the persistence layer addressed by database/collection.
//!
//! Both traits are annotated for `mockall` so tests (in this crate and in
//! dependents, through the `test-export-mocks` feature) can generate
//! deterministic mocks.
//!
//! ## Bounds
//! Both `since_id` and `max_id` of a [`PageRequest`] are **exclusive**.
//! Providers whose native API treats `max_id` as inclusive must translate.

use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::FindQuery;

/// A stored or retrieved document: a JSON object persisted verbatim.
pub type Document = serde_json::Map<String, Value>;

/// Opaque identity of one remote feed (e.g. an account handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedIdentity(String);

impl FeedIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeedIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FeedIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Provider-assigned identifier; both the uniqueness key and the ordering key of a feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Reads an id from a JSON value. Accepts unsigned integers and numeric strings
    /// (providers commonly ship 64-bit ids as `id_str` to keep them exact).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(ItemId),
            Value::String(s) => s.trim().parse::<u64>().ok().map(ItemId),
            _ => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ItemId> for Value {
    fn from(id: ItemId) -> Self {
        Value::from(id.0)
    }
}

/// A single retrieved record.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    /// Arbitrary provider fields, persisted verbatim.
    pub payload: Document,
}

impl Item {
    /// Builds an item, writing `id` into `payload[id_field]`.
    pub fn new(id: ItemId, mut payload: Document, id_field: &str) -> Self {
        payload.insert(id_field.to_string(), id.into());
        Self { id, payload }
    }

    /// Extracts the id from `payload[id_field]`. Returns `None` if it is missing or not an
    /// unsigned integer.
    pub fn from_document(payload: Document, id_field: &str) -> Option<Self> {
        let id = payload.get(id_field).and_then(ItemId::from_value)?;
        Some(Self { id, payload })
    }

    /// The document to persist. The id field is guaranteed to be present.
    pub fn into_document(mut self, id_field: &str) -> Document {
        let id = self.id;
        self.payload
            .entry(id_field.to_string())
            .or_insert_with(|| id.into());
        self.payload
    }
}

/// One page request against a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub feed: FeedIdentity,
    /// Exclusive lower bound. `None` means "from the newest available".
    pub since_id: Option<ItemId>,
    /// Exclusive upper bound, set only while resuming after a pause.
    pub max_id: Option<ItemId>,
    /// Continuation token returned by the previous page of the same walk.
    pub cursor: Option<String>,
    pub page_size: u32,
}

/// One page of results. `next_cursor == None` is the provider's end-of-data signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(items: Vec<Item>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn with_cursor(items: Vec<Item>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// Failures signalled by a [`FeedProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request budget of the current rate window is used up.
    #[error("rate limit exhausted")]
    RateLimited,
    /// Timeouts, dropped connections, 5xx and similar. Worth retrying after a pause.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// The provider refused the request for good (unknown feed, revoked credentials, ...).
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Failures signalled by a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Timeout or dropped connection; resolved by resetting the connection.
    #[error("store connectivity failure: {0}")]
    Connectivity(String),
    /// A document with the same id already exists in the collection.
    #[error("duplicate document: {0}")]
    Duplicate(String),
    /// Malformed document, authorisation failure, corrupt data and anything else not worth retrying.
    #[error("store error: {0}")]
    Fatal(String),
}

/// Remote, cursor-paginated feed API.
///
/// Implementations must be safe to share between concurrently running feed units.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// Fetch one page of a feed, ordered by recency as the provider natively orders it.
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, ProviderError>;
}

/// Persistence layer addressed by (database, collection).
///
/// Implementations must be safe to share between concurrently running feed units.
/// They should reject a second document with the same id in one collection with
/// [`StoreError::Duplicate`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a single document.
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    /// Filter, sort, limit and project the documents of a collection.
    /// A collection that does not exist yields an empty result.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StoreError>;

    /// Drop the current connection and establish a new one.
    async fn reset(&self) -> Result<(), StoreError>;

    /// Release the connection for good.
    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> FeedProvider for std::sync::Arc<T>
where
    T: FeedProvider + ?Sized,
{
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, ProviderError> {
        (**self).fetch_page(request).await
    }
}

#[async_trait]
impl<T> DocumentStore for std::sync::Arc<T>
where
    T: DocumentStore + ?Sized,
{
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        (**self).insert_one(database, collection, document).await
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        (**self).find(database, collection, query).await
    }

    async fn reset(&self) -> Result<(), StoreError> {
        (**self).reset().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}
