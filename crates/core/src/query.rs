//! Semantic search over the file and function collections.
//!
//! Embeds the query text, runs a filtered top-k against the requested
//! collection, drops the synthetic project-context document, and shapes
//! hits per collection kind. File search additionally offers a
//! best-chunk-per-path view.

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::providers::EmbeddingProvider;
use crate::vector::{collection_name, CollectionKind, MetaFilter, MetaValue, VectorStore};

/// One file-chunk hit.
#[derive(Debug, Clone, Serialize)]
pub struct FileHit {
    pub relative_path: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub language: String,
    pub file_type: String,
    pub purpose: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One function hit.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionHit {
    pub function_name: String,
    pub relative_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub class_name: String,
    pub is_method: bool,
    pub is_async: bool,
    pub language: String,
    pub layer: String,
    pub description: String,
    pub purpose: String,
    pub complexity: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub struct QueryEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        QueryEngine { store, embedder, limiter }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.limiter.acquire(500, 1).await;
        self.limiter
            .execute_with_retry(|| async { self.embedder.create_embedding(query).await })
            .await
    }

    /// Search file chunks. `dedup` keeps only the best-scoring chunk per
    /// relative path.
    pub async fn search_files(
        &self,
        root: &Path,
        query: &str,
        top_k: usize,
        filters: MetaFilter,
        include_code: bool,
        dedup: bool,
    ) -> Result<Vec<FileHit>> {
        let collection = collection_name(CollectionKind::Files, root);
        let embedding = self.embed_query(query).await?;

        // Over-fetch one to survive dropping the project-context hit
        let hits = self.store.query(&collection, &embedding, top_k + 1, &filters).await?;

        let str_of = |m: &crate::vector::Metadata, key: &str| {
            m.get(key).and_then(|v| v.as_str().map(|s| s.to_string())).unwrap_or_default()
        };
        let int_of = |m: &crate::vector::Metadata, key: &str| match m.get(key) {
            Some(MetaValue::Int(i)) => *i,
            _ => 0,
        };

        let mut results: Vec<FileHit> = hits
            .into_iter()
            .filter(|h| str_of(&h.metadata, "relative_path") != "__project_context__")
            .map(|h| FileHit {
                relative_path: str_of(&h.metadata, "relative_path"),
                chunk_index: int_of(&h.metadata, "chunk_index"),
                total_chunks: int_of(&h.metadata, "total_chunks"),
                language: str_of(&h.metadata, "language"),
                file_type: str_of(&h.metadata, "file_type"),
                purpose: str_of(&h.metadata, "purpose"),
                score: h.score,
                code: include_code.then_some(h.text),
            })
            .collect();

        if dedup {
            // Hits arrive score-descending; keep the first per path
            let mut seen = HashSet::new();
            results.retain(|hit| seen.insert(hit.relative_path.clone()));
        }
        results.truncate(top_k);

        info!(query, results = results.len(), "File search complete");
        Ok(results)
    }

    /// Search indexed functions.
    pub async fn search_functions(
        &self,
        root: &Path,
        query: &str,
        top_k: usize,
        filters: MetaFilter,
        include_code: bool,
    ) -> Result<Vec<FunctionHit>> {
        let collection = collection_name(CollectionKind::Functions, root);
        let embedding = self.embed_query(query).await?;
        let hits = self.store.query(&collection, &embedding, top_k, &filters).await?;

        let str_of = |m: &crate::vector::Metadata, key: &str| {
            m.get(key).and_then(|v| v.as_str().map(|s| s.to_string())).unwrap_or_default()
        };
        let int_of = |m: &crate::vector::Metadata, key: &str| match m.get(key) {
            Some(MetaValue::Int(i)) => *i,
            _ => 0,
        };
        let bool_of = |m: &crate::vector::Metadata, key: &str| {
            matches!(m.get(key), Some(MetaValue::Bool(true)))
        };

        let results: Vec<FunctionHit> = hits
            .into_iter()
            .map(|h| FunctionHit {
                function_name: str_of(&h.metadata, "function_name"),
                relative_path: str_of(&h.metadata, "relative_path"),
                line_start: int_of(&h.metadata, "line_start"),
                line_end: int_of(&h.metadata, "line_end"),
                class_name: str_of(&h.metadata, "class_name"),
                is_method: bool_of(&h.metadata, "is_method"),
                is_async: bool_of(&h.metadata, "is_async"),
                language: str_of(&h.metadata, "language"),
                layer: str_of(&h.metadata, "layer"),
                description: str_of(&h.metadata, "description"),
                purpose: str_of(&h.metadata, "purpose"),
                complexity: str_of(&h.metadata, "complexity"),
                score: h.score,
                code: include_code.then_some(h.text),
            })
            .collect();

        info!(query, results = results.len(), "Function search complete");
        Ok(results)
    }
}
