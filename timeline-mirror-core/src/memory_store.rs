//! In-process [`DocumentStore`] with a unique index on the id field.
//!
//! It never reports connectivity failures.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::contract::{Document, DocumentStore, ItemId, StoreError};
use crate::query::{lookup, FindQuery};

type CollectionKey = (String, String);

pub struct MemoryStore {
    id_field: String,
    collections: RwLock<HashMap<CollectionKey, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-populates a collection, bypassing the unique index.
    pub fn seed<I>(&self, database: &str, collection: &str, documents: I)
    where
        I: IntoIterator<Item = Document>,
    {
        let mut guard = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .extend(documents);
    }

    /// Ids stored in a collection, ascending.
    pub fn item_ids(&self, database: &str, collection: &str) -> Vec<ItemId> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids: Vec<ItemId> = guard
            .get(&(database.to_string(), collection.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|doc| lookup(doc, &self.id_field).and_then(ItemId::from_value))
            .collect();
        ids.sort();
        ids
    }

    /// `7` and `"7"` are the same id.
    fn index_key(&self, document: &Document) -> Option<String> {
        let value = lookup(document, &self.id_field)?;
        Some(match ItemId::from_value(value) {
            Some(id) => id.to_string(),
            None => value.to_string(),
        })
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        let guard = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("id")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let id = self.index_key(&document);
        let mut guard = self
            .collections
            .write()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".into()))?;
        let docs = guard
            .entry((database.to_string(), collection.to_string()))
            .or_default();

        if let Some(id) = &id {
            if docs
                .iter()
                .any(|existing| self.index_key(existing).as_ref() == Some(id))
            {
                return Err(StoreError::Duplicate(format!(
                    "{collection}: {} = {id}",
                    self.id_field
                )));
            }
        }
        docs.push(document);
        Ok(())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".into()))?;
        Ok(guard
            .get(&(database.to_string(), collection.to_string()))
            .map(|docs| query.evaluate(docs))
            .unwrap_or_default())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
