//! Storage layer for amem
//!
//! The `FeedbackStore` trait is the durable side of the engine: items,
//! logged queries and their embeddings, and the append-only interaction log
//! the learned weights are computed from. `StorageManager` implements it
//! with SQLite for structured records and a content-addressed blob store for
//! item bodies.

pub mod blob;
pub mod database;

use crate::error::{AmemError, Result};
use crate::embedding::cosine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use blob::{BlobStore, BlobWrite};
pub use database::{Database, DbPool, DbStats};

/// Length of the content-hash prefix in item ids
const ITEM_HASH_PREFIX: usize = 12;

/// Explicit usefulness vote attached to an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usefulness {
    NotUseful = -1,
    Neutral = 0,
    Useful = 1,
}

impl Usefulness {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Usefulness {
    type Error = AmemError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(Self::NotUseful),
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Useful),
            other => Err(AmemError::validation(
                "usefulness",
                format!("expected -1, 0 or 1, got {}", other),
            )),
        }
    }
}

impl FromStr for Usefulness {
    type Err = AmemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "useful" | "yes" | "1" | "+1" => Ok(Self::Useful),
            "neutral" | "0" => Ok(Self::Neutral),
            "notuseful" | "not_useful" | "not-useful" | "no" | "-1" => Ok(Self::NotUseful),
            other => Err(AmemError::validation(
                "usefulness",
                format!("expected useful, neutral or notuseful, got '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Usefulness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Useful => "useful",
            Self::Neutral => "neutral",
            Self::NotUseful => "notuseful",
        };
        f.write_str(name)
    }
}

/// A stored source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// `<content_hash[..12]>:<path>`
    pub item_id: String,
    pub workspace: String,
    pub path: String,
    /// Blob hash of the full content
    pub content_hash: String,
    /// Concept labels the item was tagged with
    pub concepts: Vec<String>,
    pub freshness: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Embedding logged alongside a query
#[derive(Debug, Clone, Copy)]
pub struct QueryEmbedding<'a> {
    /// Fingerprint of the embedding space
    pub model: &'a str,
    pub vector: &'a [f32],
}

/// Interaction to append to the log
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub qid: String,
    pub item_id: String,
    pub usefulness: Usefulness,
    pub dwell_ms: u64,
    pub click_rank: u32,
    pub ts: DateTime<Utc>,
}

impl NewInteraction {
    pub fn new(qid: impl Into<String>, item_id: impl Into<String>, usefulness: Usefulness) -> Self {
        Self {
            qid: qid.into(),
            item_id: item_id.into(),
            usefulness,
            dwell_ms: 0,
            click_rank: 0,
            ts: Utc::now(),
        }
    }

    pub fn with_dwell(mut self, dwell_ms: u64) -> Self {
        self.dwell_ms = dwell_ms;
        self
    }

    /// 1-based rank at which the item was clicked (0 = unknown)
    pub fn with_rank(mut self, click_rank: u32) -> Self {
        self.click_rank = click_rank;
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }
}

/// A logged interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub qid: String,
    pub item_id: String,
    pub usefulness: Usefulness,
    pub dwell_ms: u64,
    pub click_rank: u32,
    pub ts: DateTime<Utc>,
}

/// Feedback aggregates for one workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total_queries: u64,
    pub total_interactions: u64,
    pub avg_useful: f64,
    pub avg_dwell_ms: f64,
    pub avg_click_rank: f64,
    pub total_items: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Durable record of items, queries and feedback
///
/// Every call is partitioned by workspace. Interactions are append-only.
pub trait FeedbackStore: Send + Sync {
    /// Register a workspace (no-op if known)
    fn ensure_workspace(&self, workspace: &str) -> Result<()>;

    /// Store an item's content and metadata; returns its item id
    fn add_item(
        &self,
        workspace: &str,
        path: &str,
        content: &str,
        concepts: &[String],
        freshness: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// Look up an item by id, or by path (latest version) within a workspace
    fn find_item(&self, workspace: &str, item_ref: &str) -> Result<Option<ItemRecord>>;

    /// Latest version of every item in a workspace
    fn list_items(&self, workspace: &str) -> Result<Vec<ItemRecord>>;

    /// Full stored content of an item
    fn item_content(&self, item_id: &str) -> Result<String>;

    /// Log a query; returns its query id
    fn log_query(
        &self,
        workspace: &str,
        query: &str,
        embedding: Option<QueryEmbedding<'_>>,
    ) -> Result<String>;

    /// Append one interaction; unknown items or queries are `NotFound`
    fn log_interaction(&self, interaction: &NewInteraction) -> Result<()>;

    /// Interactions for an item, oldest first
    ///
    /// `cluster` restricts to the given query ids (an empty slice matches
    /// nothing); `since` drops older interactions.
    fn get_item_interactions(
        &self,
        item_id: &str,
        cluster: Option<&[String]>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionRecord>>;

    /// Ids of past workspace queries similar to `embedding`, most similar first
    fn get_similar_queries(
        &self,
        workspace: &str,
        embedding: QueryEmbedding<'_>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<String>>;

    fn get_workspace_stats(&self, workspace: &str) -> Result<FeedbackStats>;

    fn list_workspaces(&self) -> Result<Vec<String>>;
}

/// Storage manager that coordinates blob and database storage
pub struct StorageManager {
    pub blob_store: BlobStore,
    pub database: Database,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let store_dir = base_path.join("store");
        std::fs::create_dir_all(&store_dir).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to create store directory: {}", store_dir.display()),
        })?;

        let blob_store = BlobStore::new(store_dir.clone(), compression_threshold)?;
        let database = Database::new(&store_dir.join("feedback.sqlite"))?;

        tracing::debug!("Storage opened at {}", base_path.display());

        Ok(Self {
            blob_store,
            database,
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Default location for snapshots of a workspace
    pub fn snapshot_dir(&self, workspace: &str) -> PathBuf {
        self.base_path.join("snapshots").join(workspace)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        self.database.stats()
    }
}

/// Item id for content stored under `path` in `workspace`
pub fn item_id(workspace: &str, content_hash: &str, path: &str) -> String {
    let prefix: String = content_hash.chars().take(ITEM_HASH_PREFIX).collect();
    format!("{}:{}:{}", workspace, prefix, path)
}

impl FeedbackStore for StorageManager {
    fn ensure_workspace(&self, workspace: &str) -> Result<()> {
        self.database.ensure_workspace(workspace)
    }

    fn add_item(
        &self,
        workspace: &str,
        path: &str,
        content: &str,
        concepts: &[String],
        freshness: Option<DateTime<Utc>>,
    ) -> Result<String> {
        if path.trim().is_empty() {
            return Err(AmemError::validation("path", "item path cannot be empty"));
        }

        self.database.ensure_workspace(workspace)?;
        let blob = self.blob_store.write(content.as_bytes())?;

        let record = ItemRecord {
            item_id: item_id(workspace, &blob.hash, path),
            workspace: workspace.to_string(),
            path: path.to_string(),
            content_hash: blob.hash,
            concepts: concepts.to_vec(),
            freshness,
            created_at: Utc::now(),
        };
        self.database.upsert_item(&record)?;

        Ok(record.item_id)
    }

    fn find_item(&self, workspace: &str, item_ref: &str) -> Result<Option<ItemRecord>> {
        if let Some(item) = self.database.get_item(item_ref)? {
            if item.workspace == workspace {
                return Ok(Some(item));
            }
        }
        self.database.latest_item_by_path(workspace, item_ref)
    }

    fn list_items(&self, workspace: &str) -> Result<Vec<ItemRecord>> {
        self.database.latest_items(workspace)
    }

    fn item_content(&self, item_id: &str) -> Result<String> {
        let item = self
            .database
            .get_item(item_id)?
            .ok_or_else(|| AmemError::not_found("item", item_id))?;
        let bytes = self.blob_store.read(&item.content_hash)?;
        String::from_utf8(bytes).map_err(|e| AmemError::Io {
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            context: format!("Item content is not UTF-8: {}", item_id),
        })
    }

    fn log_query(
        &self,
        workspace: &str,
        query: &str,
        embedding: Option<QueryEmbedding<'_>>,
    ) -> Result<String> {
        self.database.ensure_workspace(workspace)?;
        self.database.insert_query(workspace, query, embedding, Utc::now())
    }

    fn log_interaction(&self, interaction: &NewInteraction) -> Result<()> {
        if self.database.get_item(&interaction.item_id)?.is_none() {
            return Err(AmemError::not_found("item", &interaction.item_id));
        }
        if !self.database.query_exists(&interaction.qid)? {
            return Err(AmemError::not_found("query", &interaction.qid));
        }
        self.database.insert_interaction(interaction)
    }

    fn get_item_interactions(
        &self,
        item_id: &str,
        cluster: Option<&[String]>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionRecord>> {
        if cluster.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }
        self.database.item_interactions(item_id, cluster, since)
    }

    fn get_similar_queries(
        &self,
        workspace: &str,
        embedding: QueryEmbedding<'_>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut similar: Vec<(f32, DateTime<Utc>, String)> = self
            .database
            .query_embeddings(workspace, embedding.model)?
            .into_iter()
            .filter(|(_, _, vector)| vector.len() == embedding.vector.len())
            .map(|(qid, issued, vector)| (cosine(embedding.vector, &vector), issued, qid))
            .filter(|(sim, _, _)| *sim >= threshold)
            .collect();

        similar.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });
        similar.truncate(limit);

        Ok(similar.into_iter().map(|(_, _, qid)| qid).collect())
    }

    fn get_workspace_stats(&self, workspace: &str) -> Result<FeedbackStats> {
        self.database.workspace_stats(workspace)
    }

    fn list_workspaces(&self) -> Result<Vec<String>> {
        self.database.workspaces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, StorageManager) {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf(), 1024).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_storage_manager_creation() {
        let (temp_dir, storage) = storage();
        assert!(temp_dir.path().join("store/feedback.sqlite").exists());
        assert!(temp_dir.path().join("store/blobs").exists());
        assert_eq!(storage.stats().unwrap().item_count, 0);
    }

    #[test]
    fn test_usefulness_parsing() {
        assert_eq!("useful".parse::<Usefulness>().unwrap(), Usefulness::Useful);
        assert_eq!("-1".parse::<Usefulness>().unwrap(), Usefulness::NotUseful);
        assert_eq!(Usefulness::try_from(0).unwrap(), Usefulness::Neutral);
        assert!(Usefulness::try_from(2).unwrap_err().is_validation());
        assert!("maybe".parse::<Usefulness>().is_err());
    }

    #[test]
    fn test_item_ids_and_content() {
        let (_temp, storage) = storage();
        let id = storage
            .add_item("ws", "auth.py", "def verify_jwt(): pass", &[], None)
            .unwrap();

        let hash = BlobStore::hash_data(b"def verify_jwt(): pass");
        assert_eq!(id, format!("ws:{}:auth.py", &hash[..12]));
        assert_eq!(storage.item_content(&id).unwrap(), "def verify_jwt(): pass");

        // Same content, same id
        let again = storage
            .add_item("ws", "auth.py", "def verify_jwt(): pass", &["Auth".into()], None)
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(storage.list_items("ws").unwrap().len(), 1);
        assert_eq!(storage.list_items("ws").unwrap()[0].concepts, vec!["Auth"]);
    }

    #[test]
    fn test_find_item_by_path_returns_latest() {
        let (_temp, storage) = storage();
        storage.add_item("ws", "notes.md", "version one", &[], None).unwrap();
        let v2 = storage.add_item("ws", "notes.md", "version two", &[], None).unwrap();

        let found = storage.find_item("ws", "notes.md").unwrap().unwrap();
        assert_eq!(found.item_id, v2);
        assert!(storage.find_item("other", "notes.md").unwrap().is_none());
        assert!(storage.find_item("other", &v2).unwrap().is_none());

        let items = storage.list_items("ws").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, v2);
    }

    #[test]
    fn test_same_file_in_two_workspaces() {
        let (_temp, storage) = storage();
        let a = storage.add_item("w1", "README.md", "shared text", &[], None).unwrap();
        let b = storage.add_item("w2", "README.md", "shared text", &[], None).unwrap();
        assert_ne!(a, b);

        assert_eq!(storage.find_item("w1", "README.md").unwrap().unwrap().item_id, a);
        assert_eq!(storage.find_item("w2", "README.md").unwrap().unwrap().item_id, b);
        assert_eq!(storage.list_items("w1").unwrap().len(), 1);
        assert_eq!(storage.list_items("w2").unwrap().len(), 1);
        assert!(storage.find_item("w2", &a).unwrap().is_none());
    }

    #[test]
    fn test_log_interaction_rejects_unknown_item() {
        let (_temp, storage) = storage();
        let qid = storage.log_query("ws", "jwt", None).unwrap();

        let err = storage
            .log_interaction(&NewInteraction::new(&qid, "missing:item", Usefulness::Useful))
            .unwrap_err();
        assert!(matches!(err, AmemError::NotFound { kind: "item", .. }));
    }

    #[test]
    fn test_similar_queries_same_model_only() {
        let (_temp, storage) = storage();
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.9f32, 0.1, 0.0];
        let c = [0.0f32, 1.0, 0.0];

        let qa = storage
            .log_query("ws", "a", Some(QueryEmbedding { model: "m1", vector: &a }))
            .unwrap();
        let qb = storage
            .log_query("ws", "b", Some(QueryEmbedding { model: "m1", vector: &b }))
            .unwrap();
        storage
            .log_query("ws", "c", Some(QueryEmbedding { model: "m1", vector: &c }))
            .unwrap();
        storage
            .log_query("ws", "a2", Some(QueryEmbedding { model: "m2", vector: &a }))
            .unwrap();
        storage
            .log_query("other", "a3", Some(QueryEmbedding { model: "m1", vector: &a }))
            .unwrap();

        let similar = storage
            .get_similar_queries("ws", QueryEmbedding { model: "m1", vector: &a }, 0.35, 10)
            .unwrap();
        assert_eq!(similar, vec![qa.clone(), qb]);

        let limited = storage
            .get_similar_queries("ws", QueryEmbedding { model: "m1", vector: &a }, 0.35, 1)
            .unwrap();
        assert_eq!(limited, vec![qa]);
    }
}
