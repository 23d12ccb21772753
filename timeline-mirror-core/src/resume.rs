//! Resume point lookup: the newest item id already stored for a feed.

use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::contract::{DocumentStore, FeedIdentity, ItemId};
use crate::gateway::{GatewayError, StoreGateway};
use crate::query::{lookup, FindQuery, SortOrder};

/// The query used to find the newest stored item of `feed`.
pub fn latest_item_query(config: &SyncConfig, feed: &FeedIdentity) -> FindQuery {
    let mut query = FindQuery::new();
    if let Some(owner_field) = &config.owner_field {
        query = query.filter_eq(owner_field.as_str(), feed.as_str());
    }
    query
        .project([config.id_field.as_str()])
        .sort_by(config.id_field.as_str(), SortOrder::Descending)
        .limit(1)
}

/// Returns the maximum stored item id for `feed`, or `None` if nothing is stored yet.
///
/// Retrying on store unavailability is the gateway's job; this performs one query.
pub async fn latest_item_id<S>(
    gateway: &StoreGateway<S>,
    config: &SyncConfig,
    feed: &FeedIdentity,
) -> Result<Option<ItemId>, GatewayError>
where
    S: DocumentStore,
{
    let collection = config.collection_for(feed);
    let query = latest_item_query(config, feed);
    let documents = gateway.query(&collection, &query).await?;

    let Some(latest) = documents.first() else {
        debug!(feed = %feed, collection = %collection, "[RESUME] No stored items");
        return Ok(None);
    };

    match lookup(latest, &config.id_field).and_then(ItemId::from_value) {
        Some(id) => {
            debug!(feed = %feed, latest_id = %id, "[RESUME] Found latest stored item");
            Ok(Some(id))
        }
        None => {
            warn!(
                feed = %feed,
                id_field = %config.id_field,
                "[RESUME] Latest stored document has no usable id; starting from newest available"
            );
            Ok(None)
        }
    }
}
