//! Vector store facade plus the shipped local implementation.
//!
//! Collections are scoped per (project, kind): `{kind}_{hash12(project)}`.
//! The local store keeps each collection as an in-memory document map with a
//! JSON snapshot on disk under `<storage_root>/collections/`, and scores
//! queries by brute-force scan, which holds up fine at repository scale and
//! is trivially durable across restarts.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::project_hash12;

// ---------------------------------------------------------------------------
// Metadata values
// ---------------------------------------------------------------------------

/// Metadata payload value: the scalar union the store accepts. List fields
/// are flattened to comma-joined strings on write and split on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Flatten a list field into the stored scalar form.
    pub fn from_list(items: &[String]) -> MetaValue {
        MetaValue::Str(items.join(", "))
    }

    /// Split a flattened list field back into items.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            MetaValue::Str(s) if !s.is_empty() => {
                s.split(", ").map(|p| p.to_string()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(v as i64)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

// ---------------------------------------------------------------------------
// Documents and hits
// ---------------------------------------------------------------------------

/// A document ready for upsert. The id must be a pure function of
/// (project, collection, stable key) so re-upserts replace in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// A scored query result. `score` is in [0, 1], decreasing with distance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Collection naming
// ---------------------------------------------------------------------------

/// The three collection kinds a project owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Analysis,
    Files,
    Functions,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Analysis => "analysis",
            CollectionKind::Files => "files",
            CollectionKind::Functions => "functions",
        }
    }
}

/// Stable collection name for a (project, kind) pair.
pub fn collection_name(kind: CollectionKind, project_path: &Path) -> String {
    format!("{}_{}", kind.as_str(), project_hash12(project_path))
}

// ---------------------------------------------------------------------------
// Facade trait
// ---------------------------------------------------------------------------

/// Equality filter over metadata fields, ANDed together.
pub type MetaFilter = Vec<(String, MetaValue)>;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace documents by id. Replacement is atomic as observed
    /// by subsequent queries.
    async fn upsert(&self, collection: &str, docs: Vec<Document>) -> Result<()>;

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<usize>;

    /// Delete every document whose metadata matches all filter clauses.
    /// Returns the number of documents removed.
    async fn delete_where(&self, collection: &str, filter: &MetaFilter) -> Result<usize>;

    /// Filtered top-k by embedding similarity.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: &MetaFilter,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self, collection: &str) -> Result<usize>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Local implementation
// ---------------------------------------------------------------------------

#[derive(Default, Serialize, Deserialize)]
struct CollectionData {
    docs: BTreeMap<String, Document>,
}

/// Local persistent vector store: one JSON snapshot per collection, cached
/// in memory behind a concurrent map so worker tasks can upsert in parallel.
pub struct LocalVectorStore {
    dir: PathBuf,
    collections: DashMap<String, Arc<tokio::sync::RwLock<CollectionData>>>,
}

impl LocalVectorStore {
    pub fn open(storage_root: &Path) -> Result<Self> {
        let dir = storage_root.join("collections");
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Vector store ready");
        Ok(LocalVectorStore { dir, collections: DashMap::new() })
    }

    fn snapshot_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    fn handle(&self, collection: &str) -> Arc<tokio::sync::RwLock<CollectionData>> {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| {
                let data = self.load_snapshot(collection).unwrap_or_else(|e| {
                    warn!(collection, error = %e, "Failed to load collection snapshot, starting empty");
                    CollectionData::default()
                });
                Arc::new(tokio::sync::RwLock::new(data))
            })
            .clone()
    }

    fn load_snapshot(&self, collection: &str) -> Result<CollectionData> {
        let path = self.snapshot_path(collection);
        if !path.exists() {
            return Ok(CollectionData::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn persist(&self, collection: &str, data: &CollectionData) -> Result<()> {
        let path = self.snapshot_path(collection);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(data)?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn matches_filter(metadata: &Metadata, filter: &MetaFilter) -> bool {
    filter.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Score from squared-error distance: 1/(1+d), monotonically decreasing.
fn similarity_score(query: &[f32], doc: &[f32]) -> f32 {
    if query.is_empty() || doc.len() != query.len() {
        return 0.0;
    }
    let dist: f32 = query
        .iter()
        .zip(doc.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt();
    1.0 / (1.0 + dist)
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let handle = self.handle(collection);
        let mut data = handle.write().await;
        let count = docs.len();
        for doc in docs {
            data.docs.insert(doc.id.clone(), doc);
        }
        self.persist(collection, &data).await?;
        debug!(collection, count, "Upserted documents");
        Ok(())
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let handle = self.handle(collection);
        let mut data = handle.write().await;
        let mut removed = 0;
        for id in ids {
            if data.docs.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist(collection, &data).await?;
        }
        Ok(removed)
    }

    async fn delete_where(&self, collection: &str, filter: &MetaFilter) -> Result<usize> {
        let handle = self.handle(collection);
        let mut data = handle.write().await;
        let before = data.docs.len();
        data.docs.retain(|_, doc| !matches_filter(&doc.metadata, filter));
        let removed = before - data.docs.len();
        if removed > 0 {
            self.persist(collection, &data).await?;
        }
        Ok(removed)
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: &MetaFilter,
    ) -> Result<Vec<SearchHit>> {
        let handle = self.handle(collection);
        let data = handle.read().await;

        let mut hits: Vec<SearchHit> = data
            .docs
            .values()
            .filter(|doc| matches_filter(&doc.metadata, filter))
            .map(|doc| SearchHit {
                id: doc.id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                score: similarity_score(embedding, &doc.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let handle = self.handle(collection);
        let data = handle.read().await;
        Ok(data.docs.len())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.remove(collection);
        let path = self.snapshot_path(collection);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| Error::VectorStore(format!("drop {collection}: {e}")))?;
        }
        info!(collection, "Dropped collection");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
