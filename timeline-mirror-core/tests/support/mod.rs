#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use timeline_mirror_core::contract::{
    Document, DocumentStore, FeedIdentity, FeedProvider, Item, ItemId, Page, PageRequest,
    ProviderError, StoreError,
};
use timeline_mirror_core::memory_store::MemoryStore;
use timeline_mirror_core::query::FindQuery;

pub fn tweet(feed: &str, id: u64) -> Document {
    json!({
        "id": id,
        "text": format!("post {id} by {feed}"),
        "user": { "screen_name": feed },
    })
    .as_object()
    .cloned()
    .expect("object literal")
}

/// In-memory timeline that pages newest-first, honours exclusive `since_id`/`max_id`
/// and can be scripted to fail specific calls.
#[derive(Default)]
pub struct FakeTimeline {
    feeds: HashMap<FeedIdentity, Vec<u64>>,
    failures: Mutex<HashMap<usize, ProviderError>>,
    requests: Mutex<Vec<PageRequest>>,
    inclusive_bounds: bool,
    panic_for: HashSet<FeedIdentity>,
}

impl FakeTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, feed: &str, ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        self.feeds.insert(FeedIdentity::from(feed), ids);
        self
    }

    /// Fail the `call`-th request (0-based, counted across all feeds).
    pub fn failing_call(self, call: usize, error: ProviderError) -> Self {
        self.failures.lock().unwrap().insert(call, error);
        self
    }

    /// Treat bounds as inclusive, so the boundary items come back.
    pub fn with_inclusive_bounds(mut self) -> Self {
        self.inclusive_bounds = true;
        self
    }

    pub fn panicking_for(mut self, feed: &str) -> Self {
        self.panic_for.insert(FeedIdentity::from(feed));
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, feed: &str) -> Vec<PageRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.feed.as_str() == feed)
            .collect()
    }
}

#[async_trait]
impl FeedProvider for FakeTimeline {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        if let Some(error) = self.failures.lock().unwrap().remove(&call) {
            return Err(error);
        }
        if self.panic_for.contains(&request.feed) {
            panic!("provider blew up for {}", request.feed);
        }

        let Some(ids) = self.feeds.get(&request.feed) else {
            return Err(ProviderError::Rejected(format!("unknown feed {}", request.feed)));
        };

        let inclusive = self.inclusive_bounds;
        let mut visible: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| match request.since_id {
                Some(ItemId(since)) if inclusive => *id >= since,
                Some(ItemId(since)) => *id > since,
                None => true,
            })
            .filter(|id| match request.max_id {
                Some(ItemId(max)) if inclusive => *id <= max,
                Some(ItemId(max)) => *id < max,
                None => true,
            })
            .collect();
        visible.reverse();

        let offset: usize = request
            .cursor
            .as_deref()
            .map(|c| c.parse().expect("fake cursor"))
            .unwrap_or(0);
        let size = request.page_size.max(1) as usize;
        let end = (offset + size).min(visible.len());
        let items = visible[offset.min(end)..end]
            .iter()
            .map(|id| Item::new(ItemId(*id), tweet(request.feed.as_str(), *id), "id"))
            .collect();

        Ok(if end < visible.len() {
            Page::with_cursor(items, end.to_string())
        } else {
            Page::last(items)
        })
    }
}

/// Wraps a [`MemoryStore`] and injects failures.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    fatal_collection: Option<String>,
    fatal_after_inserts: Option<usize>,
    connectivity_failures: AtomicUsize,
    inserts: AtomicUsize,
    resets: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fatal_collection: None,
            fatal_after_inserts: None,
            connectivity_failures: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// Every insert into `collection` fails fatally.
    pub fn fatal_for(mut self, collection: &str) -> Self {
        self.fatal_collection = Some(collection.to_string());
        self
    }

    /// Inserts succeed `n` times, then fail fatally.
    pub fn fatal_after(mut self, n: usize) -> Self {
        self.fatal_after_inserts = Some(n);
        self
    }

    /// The next `n` operations fail with a connectivity error.
    pub fn drop_connection(self, n: usize) -> Self {
        self.connectivity_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn take_connectivity_failure(&self) -> bool {
        self.connectivity_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        if self.take_connectivity_failure() {
            return Err(StoreError::Connectivity("connection reset by peer".into()));
        }
        if self.fatal_collection.as_deref() == Some(collection) {
            return Err(StoreError::Fatal(format!("not authorized on {collection}")));
        }
        let done = self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fatal_after_inserts.is_some_and(|limit| done >= limit) {
            return Err(StoreError::Fatal("document failed validation".into()));
        }
        self.inner.insert_one(database, collection, document).await
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        if self.take_connectivity_failure() {
            return Err(StoreError::Connectivity("network timeout".into()));
        }
        self.inner.find(database, collection, query).await
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
