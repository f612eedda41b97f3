//! Feedback document-store backend
//!
//! Feedback entries live in named collections of documents keyed
//! `agent_{agent_id}_property_{property_id}`. The store sits behind the
//! [`FeedbackStore`] trait so the persistence layer can be swapped.

pub mod filter;
pub mod query;

pub use filter::{FilterExpr, FilterOp};
pub use query::{handle_feedback_query, normalize_ids};

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// One customer feedback record about a property and its agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackEntry {
    pub property_id: i64,
    pub agent_id: i64,
    #[serde(default)]
    pub property_feedback: String,
    #[serde(default)]
    pub agent_feedback: String,
    /// Fields beyond the known four are kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedbackEntry {
    pub fn new(
        property_id: i64,
        agent_id: i64,
        property_feedback: impl Into<String>,
        agent_feedback: impl Into<String>,
    ) -> Self {
        Self {
            property_id,
            agent_id,
            property_feedback: property_feedback.into(),
            agent_feedback: agent_feedback.into(),
            extra: Map::new(),
        }
    }

    pub fn document_id(&self) -> String {
        format!("agent_{}_property_{}", self.agent_id, self.property_id)
    }

    /// Flat JSON object, as filters and prompts see it
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("property_id".to_string(), Value::from(self.property_id));
        object.insert("agent_id".to_string(), Value::from(self.agent_id));
        object.insert("property_feedback".to_string(), Value::from(self.property_feedback.clone()));
        object.insert("agent_feedback".to_string(), Value::from(self.agent_feedback.clone()));
        for (key, value) in &self.extra {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(object)
    }
}

/// Collection name used for a feedback file, e.g. `feedback.json` → `feedback_feedback`
pub fn collection_name(file_stem: &str) -> String {
    format!("{}_feedback", file_stem)
}

#[async_trait::async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Every entry of a collection; unknown collections are empty
    async fn fetch_all(&self, collection: &str) -> Result<Vec<FeedbackEntry>>;

    /// Insert or overwrite one document
    async fn put(&self, collection: &str, doc_id: &str, entry: FeedbackEntry) -> Result<()>;

    async fn put_many(&self, collection: &str, entries: Vec<FeedbackEntry>) -> Result<usize> {
        let count = entries.len();
        for entry in entries {
            self.put(collection, &entry.document_id(), entry).await?;
        }
        Ok(count)
    }
}

type Collections = BTreeMap<String, BTreeMap<String, FeedbackEntry>>;

/// Volatile store for tests and runs without a store file
#[derive(Default, Clone)]
pub struct InMemoryFeedbackStore {
    collections: Arc<RwLock<Collections>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<FeedbackEntry>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, doc_id: &str, entry: FeedbackEntry) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), entry);
        Ok(())
    }
}

/// Collections persisted as one JSON file, rewritten after every write
pub struct JsonFileFeedbackStore {
    path: PathBuf,
    collections: RwLock<Collections>,
}

impl JsonFileFeedbackStore {
    /// Open the store file, starting empty when it does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).map_err(|e| {
                AssistantError::FeedbackStoreError(format!("Corrupt store {}: {}", path.display(), e))
            })?,
            Ok(_) => Collections::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), collections = collections.len(), "Opened feedback store");
        Ok(Self {
            path,
            collections: RwLock::new(collections),
        })
    }

    async fn flush(&self, collections: &Collections) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(collections)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FeedbackStore for JsonFileFeedbackStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<FeedbackEntry>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, doc_id: &str, entry: FeedbackEntry) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), entry);
        self.flush(&collections).await
    }

    async fn put_many(&self, collection: &str, entries: Vec<FeedbackEntry>) -> Result<usize> {
        let count = entries.len();
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        for entry in entries {
            docs.insert(entry.document_id(), entry);
        }
        self.flush(&collections).await?;
        Ok(count)
    }
}

/// Load every `*.json` array file in `dir` into the collection named after
/// its file stem. Returns the number of entries written.
#[instrument(name = "upload_feedback_jsons", skip(store))]
pub async fn upload_feedback_dir(store: &dyn FeedbackStore, dir: &Path) -> Result<usize> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| AssistantError::IngestError(format!("Cannot read {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut total = 0;
    for path in files {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let collection = collection_name(stem);

        let bytes = tokio::fs::read(&path).await?;
        let entries: Vec<FeedbackEntry> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(file = %path.display(), "[FEEDBACK] Skipping malformed feedback file: {}", e);
                continue;
            }
        };

        let written = store.put_many(&collection, entries).await?;
        info!(collection = %collection, entries = written, "[FEEDBACK] Uploaded feedback file");
        total += written;
    }

    Ok(total)
}
