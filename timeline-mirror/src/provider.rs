#![doc = "HTTP feed provider: bridges the core `FeedProvider` trait to the remote timeline API."]
//
//! # HTTP Feed Provider (CLI <-> Core)
//!
//! This module wires the [`FeedProvider`] seam of `timeline-mirror-core` to a real
//! HTTP endpoint and provides the [`HttpTimelineClient`] used by the CLI.
//!
//! ## Wire format
//!
//! `GET {base_url}/timelines/{feed}?count=..&since_id=..&max_id=..&cursor=..`
//! answers `{"items": [...], "next_cursor": "..." | null}`. Both id bounds are
//! exclusive. The feed identity is sent as one percent-encoded path segment.
//!
//! ## Client Usage
//!
//! - Read the four credential strings with [`Credentials::from_env`]
//!   (`TIMELINE_CONSUMER_KEY`, `TIMELINE_CONSUMER_SECRET`, `TIMELINE_ACCESS_TOKEN`,
//!   `TIMELINE_ACCESS_SECRET`).
//! - Build the client with [`HttpTimelineClient::new`]; share it between feed units.
//! - Status codes are mapped onto [`ProviderError`] by [`classify_status`].

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use timeline_mirror_core::contract::{
    Document, FeedIdentity, FeedProvider, Item, Page, PageRequest, ProviderError,
};

pub const CONSUMER_KEY_ENV: &str = "TIMELINE_CONSUMER_KEY";
pub const CONSUMER_SECRET_ENV: &str = "TIMELINE_CONSUMER_SECRET";
pub const ACCESS_TOKEN_ENV: &str = "TIMELINE_ACCESS_TOKEN";
pub const ACCESS_SECRET_ENV: &str = "TIMELINE_ACCESS_SECRET";

/// The four credential strings the provider expects on every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // loads environment variables from .env if present
        let read = |name: &str| {
            env::var(name).map_err(|e| {
                tracing::error!(error = ?e, variable = name, "Credential missing in environment");
                anyhow::anyhow!("environment variable {name} is required: {e}")
            })
        };
        let credentials = Credentials {
            consumer_key: read(CONSUMER_KEY_ENV)?,
            consumer_secret: read(CONSUMER_SECRET_ENV)?,
            access_token: read(ACCESS_TOKEN_ENV)?,
            access_secret: read(ACCESS_SECRET_ENV)?,
        };
        tracing::info!(
            consumer_key_set = !credentials.consumer_key.is_empty(),
            access_token_set = !credentials.access_token.is_empty(),
            "Loaded provider credentials from environment"
        );
        Ok(credentials)
    }
}

#[derive(Debug, Deserialize)]
struct WirePage {
    #[serde(default)]
    items: Vec<Document>,
    next_cursor: Option<String>,
}

pub struct HttpTimelineClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
    id_field: String,
}

impl HttpTimelineClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Credentials,
        id_field: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("timeline-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| anyhow::anyhow!("invalid provider base_url {raw:?}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("provider base_url {raw:?} cannot carry a path");
        }
        tracing::info!(base_url = %base_url, timeout_secs = timeout.as_secs(), "Initialized HttpTimelineClient");
        Ok(Self {
            http,
            base_url,
            credentials,
            id_field: id_field.into(),
        })
    }

    /// `{base_url}/timelines/{feed}` with the feed escaped as a single segment.
    pub fn timeline_url(&self, feed: &FeedIdentity) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Rejected(format!("base url {} has no path", self.base_url)))?
            .pop_if_empty()
            .push("timelines")
            .push(feed.as_str());
        Ok(url)
    }
}

/// Maps a non-success status onto the provider error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ProviderError::Transient(format!("{status}: {body}"))
    } else {
        ProviderError::Rejected(format!("{status}: {body}"))
    }
}

#[async_trait]
impl FeedProvider for HttpTimelineClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, ProviderError> {
        let mut query: Vec<(&str, String)> = vec![("count", request.page_size.to_string())];
        if let Some(since) = request.since_id {
            query.push(("since_id", since.to_string()));
        }
        if let Some(max) = request.max_id {
            query.push(("max_id", max.to_string()));
        }
        if let Some(cursor) = &request.cursor {
            query.push(("cursor", cursor.clone()));
        }

        tracing::debug!(
            feed = %request.feed,
            since_id = ?request.since_id,
            max_id = ?request.max_id,
            cursor = ?request.cursor,
            "Requesting timeline page"
        );

        let response = self
            .http
            .get(self.timeline_url(&request.feed)?)
            .query(&query)
            .basic_auth(
                &self.credentials.consumer_key,
                Some(&self.credentials.consumer_secret),
            )
            .header("X-Access-Token", &self.credentials.access_token)
            .header("X-Access-Secret", &self.credentials.access_secret)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(feed = %request.feed, error = %e, "Timeline request failed");
                // no status line: timeout, refused or dropped connection
                ProviderError::Transient(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            tracing::warn!(feed = %request.feed, %status, error = %err, "Timeline request refused");
            return Err(err);
        }

        let wire: WirePage = response.json().await.map_err(|e| {
            tracing::warn!(feed = %request.feed, error = %e, "Failed to decode timeline page");
            ProviderError::Transient(format!("malformed page: {e}"))
        })?;

        let mut items = Vec::with_capacity(wire.items.len());
        for document in wire.items {
            match Item::from_document(document, &self.id_field) {
                Some(item) => items.push(item),
                None => tracing::warn!(
                    feed = %request.feed,
                    id_field = %self.id_field,
                    "Skipping item without a usable id"
                ),
            }
        }

        tracing::debug!(
            feed = %request.feed,
            items = items.len(),
            has_more = wire.next_cursor.is_some(),
            "Received timeline page"
        );
        Ok(Page {
            items,
            next_cursor: wire.next_cursor,
        })
    }
}
