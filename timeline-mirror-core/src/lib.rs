#![doc = "timeline-mirror-core: incremental retrieval engine for timeline-mirror."]

//! This crate mirrors remote, paginated, rate-limited timelines into a document store.
//! It holds the data model, the provider/store contracts and the engine built on them;
//! concrete HTTP and file-backed clients live in the `timeline-mirror` crate.
//!
//! # Components
//! - [`walker`]: pausing page walk over one feed
//! - [`resume`]: newest stored item id per feed
//! - [`synchronise`]: one feed end to end
//! - [`fleet`]: one concurrent unit per feed
//! - [`gateway`]: reconnect-and-retry wrapper around the store
//! - [`rate_budget`]: request budget shared by all units

pub mod config;
pub mod contract;
pub mod fleet;
pub mod gateway;
pub mod memory_store;
pub mod query;
pub mod rate_budget;
pub mod resume;
pub mod synchronise;
pub mod walker;

pub use config::{RateBudgetConfig, RetryPolicy, SyncConfig};
pub use contract::{
    Document, DocumentStore, FeedIdentity, FeedProvider, Item, ItemId, Page, PageRequest,
    ProviderError, StoreError,
};
pub use fleet::{launch, synchronise_fleet, FeedOutcome, FeedStatus, FleetHandle, FleetReport};
pub use synchronise::{synchronise_feed, FeedReport, SyncContext, SyncError, SyncMode};
