//! JSON-lines [`DocumentStore`]: one file per collection under
//! `<root>/<database>/<collection>.jsonl`, one document per line.
//!
//! A unique index on the id field is built lazily per collection from the file's
//! contents and kept in memory. Each collection has its own lock, so writers on
//! different feeds never wait on each other. `reset` drops every cached index so
//! the next operation re-reads from disk.
//!
//! Database and collection names must be single path components.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use timeline_mirror_core::contract::{Document, DocumentStore, ItemId, StoreError};
use timeline_mirror_core::query::{lookup, FindQuery};

type CollectionKey = (String, String);
/// `None` until the collection's file has been read.
type CollectionIndex = Arc<Mutex<Option<HashSet<String>>>>;

pub struct JsonlStore {
    root: PathBuf,
    id_field: String,
    indices: std::sync::Mutex<HashMap<CollectionKey, CollectionIndex>>,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>, id_field: impl Into<String>) -> Self {
        let root = root.into();
        info!(root = ?root, "Opened JSON-lines document store");
        Self {
            root,
            id_field: id_field.into(),
            indices: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Where a collection lives. Names that would leave the store root are refused.
    pub fn collection_path(&self, database: &str, collection: &str) -> Result<PathBuf, StoreError> {
        let database = path_component("database", database)?;
        let collection = path_component("collection", collection)?;
        Ok(self
            .root
            .join(database)
            .join(format!("{collection}.jsonl")))
    }

    fn collection_index(&self, database: &str, collection: &str) -> CollectionIndex {
        let mut indices = self.indices.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            indices
                .entry((database.to_string(), collection.to_string()))
                .or_default(),
        )
    }

    fn all_indices(&self) -> Vec<CollectionIndex> {
        let indices = self.indices.lock().unwrap_or_else(PoisonError::into_inner);
        indices.values().cloned().collect()
    }

    fn index_key(&self, document: &Document) -> Option<String> {
        let value = lookup(document, &self.id_field)?;
        Some(match ItemId::from_value(value) {
            Some(id) => id.to_string(),
            None => value.to_string(),
        })
    }

    async fn load_index(&self, path: &Path) -> Result<HashSet<String>, StoreError> {
        repair_torn_tail(path).await?;
        let documents = read_documents(path).await?;
        Ok(documents
            .iter()
            .filter_map(|doc| self.index_key(doc))
            .collect())
    }
}

fn path_component<'a>(kind: &str, name: &'a str) -> Result<&'a str, StoreError> {
    let unsafe_name = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if unsafe_name {
        return Err(StoreError::Fatal(format!(
            "{kind} name {name:?} is not a single path component"
        )));
    }
    Ok(name)
}

async fn read_documents(path: &Path) -> Result<Vec<Document>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(map_io(e, path)),
    };
    let unterminated = !content.is_empty() && !content.ends_with('\n');
    let last = content.lines().count().saturating_sub(1);

    let mut documents = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(document)) => documents.push(document),
            Err(e) if unterminated && n == last => {
                warn!(path = ?path, line = n + 1, error = %e, "Ignoring torn final line");
            }
            Ok(_) => {
                return Err(StoreError::Fatal(format!(
                    "{}:{}: line is not a JSON object",
                    path.display(),
                    n + 1
                )))
            }
            Err(e) => return Err(StoreError::Fatal(format!("{}:{}: {e}", path.display(), n + 1))),
        }
    }
    Ok(documents)
}

/// A final line without its newline is either a whole document missing the
/// terminator or the remains of an interrupted append. Finish the first, cut the second.
async fn repair_torn_tail(path: &Path) -> Result<(), StoreError> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(map_io(e, path)),
    };
    if content.is_empty() || content.ends_with(b"\n") {
        return Ok(());
    }
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |newline| newline + 1);
    let tail = &content[keep..];

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .map_err(|e| map_io(e, path))?;
    if serde_json::from_slice::<Document>(tail).is_ok() {
        debug!(path = ?path, "Terminating final line");
        file.write_all(b"\n").await.map_err(|e| map_io(e, path))?;
        file.flush().await.map_err(|e| map_io(e, path))?;
    } else {
        warn!(path = ?path, dropped_bytes = tail.len(), "Truncating torn final line");
        file.set_len(keep as u64).await.map_err(|e| map_io(e, path))?;
    }
    Ok(())
}

/// Interrupted and timed-out I/O is worth a reconnect; anything else is not.
fn map_io(e: io::Error, path: &Path) -> StoreError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => StoreError::Connectivity(message),
        _ => StoreError::Fatal(message),
    }
}

/// The file operations an append needs, so a failing writer can stand in for the disk.
#[async_trait]
trait AppendTarget: Send {
    async fn len(&mut self) -> io::Result<u64>;
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
    async fn truncate(&mut self, len: u64) -> io::Result<()>;
}

#[async_trait]
impl AppendTarget for fs::File {
    async fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.write_all(line).await?;
        self.flush().await
    }

    async fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len).await
    }
}

/// Appends `line`; on failure the target is cut back to its previous length.
async fn append_or_rollback<T: AppendTarget>(target: &mut T, line: &[u8]) -> io::Result<()> {
    let before = target.len().await?;
    if let Err(e) = target.write_line(line).await {
        if let Err(rollback) = target.truncate(before).await {
            warn!(error = %rollback, length = before, "Failed to roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for JsonlStore {
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let path = self.collection_path(database, collection)?;
        let key = self.index_key(&document);

        // Held across the append so concurrent writers cannot race the index.
        let entry = self.collection_index(database, collection);
        let mut slot = entry.lock().await;
        if slot.is_none() {
            let index = self.load_index(&path).await?;
            debug!(path = ?path, entries = index.len(), "Loaded collection index");
            *slot = Some(index);
        }
        let index = slot.get_or_insert_with(HashSet::new);

        if let Some(key) = &key {
            if index.contains(key) {
                return Err(StoreError::Duplicate(format!(
                    "{collection}: {} = {key}",
                    self.id_field
                )));
            }
        }

        let mut line = serde_json::to_string(&document)
            .map_err(|e| StoreError::Fatal(format!("unserialisable document: {e}")))?;
        line.push('\n');

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, parent))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| map_io(e, &path))?;
        append_or_rollback(&mut file, line.as_bytes())
            .await
            .map_err(|e| map_io(e, &path))?;

        if let Some(key) = key {
            index.insert(key);
        }
        Ok(())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let path = self.collection_path(database, collection)?;
        let documents = read_documents(&path).await?;
        Ok(query.evaluate(&documents))
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let indices = self.all_indices();
        warn!(cached = indices.len(), "Resetting JSON-lines store; dropping cached indices");
        for entry in indices {
            *entry.lock().await = None;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        for entry in self.all_indices() {
            *entry.lock().await = None;
        }
        info!(root = ?self.root, "Closed JSON-lines document store");
        Ok(())
    }
}
