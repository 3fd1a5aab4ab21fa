//! Top-level indexer facade.
//!
//! Wires the engines together over shared storage and enforces the
//! dependency order: project analysis feeds the file index, which feeds the
//! function index. Incremental update and removal fan out to whichever
//! indexes exist.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::analysis::{ProjectAnalyzer, STOP_OK};
use crate::checkpoint::{CheckpointStore, IndexKind, IndexStats};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_index::FileIndexEngine;
use crate::function_index::FunctionIndexEngine;
use crate::limiter::RateLimiter;
use crate::providers::{build_providers, EmbeddingProvider, LlmProvider};
use crate::query::{FileHit, FunctionHit, QueryEngine};
use crate::tokenizer::create_tokenizer;
use crate::types::{FileIndexReport, FunctionIndexReport, OpStatus, ProjectAnalysis};
use crate::vector::{LocalVectorStore, MetaFilter, VectorStore};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Combined status for one project across all three indexes.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub analysis: AnalysisStatus,
    pub files: IndexStats,
    pub functions: IndexStats,
}

#[derive(Debug, Serialize)]
pub struct AnalysisStatus {
    pub status: &'static str,
    pub iteration_count: u32,
    pub min_confidence: u8,
    pub avg_confidence: u8,
    pub files_analyzed: usize,
}

/// Result of a full sequential build.
#[derive(Debug, Serialize)]
pub struct FullIndexReport {
    pub status: OpStatus,
    pub analysis_completed: bool,
    pub min_confidence: u8,
    pub files: FileIndexReport,
    /// Absent when the file index failed outright.
    pub functions: Option<FunctionIndexReport>,
}

/// Result of a targeted update across indexes.
#[derive(Debug, Serialize)]
pub struct UpdateReport {
    pub files: FileIndexReport,
    pub functions: Option<FunctionIndexReport>,
}

/// Result of removing files from all indexes.
#[derive(Debug, Serialize)]
pub struct RemovalReport {
    pub removed_files: usize,
    pub file_documents: usize,
    pub function_documents: usize,
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Owns the shared stores and the three engines for a workspace.
pub struct Indexer {
    checkpoints: Arc<CheckpointStore>,
    analyzer: ProjectAnalyzer,
    files: FileIndexEngine,
    functions: FunctionIndexEngine,
    query: QueryEngine,
}

impl Indexer {
    /// Build an indexer over explicit providers (the CLI path uses
    /// [`Indexer::from_env`]; tests inject mocks here).
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_root)?;
        let checkpoints = Arc::new(CheckpointStore::open(&config.storage_root)?);
        let store: Arc<dyn VectorStore> = Arc::new(LocalVectorStore::open(&config.storage_root)?);
        let limiter = Arc::new(
            RateLimiter::new(config.rate.requests_per_minute, config.rate.tokens_per_minute)
                .with_retry_policy(config.rate.max_retries, config.rate.base_delay),
        );
        let tokenizer = create_tokenizer("bytes-estimate");

        let analyzer =
            ProjectAnalyzer::new(Arc::clone(&llm), Arc::clone(&checkpoints), Arc::clone(&limiter));
        let files = FileIndexEngine::new(
            config.clone(),
            Arc::clone(&checkpoints),
            Arc::clone(&store),
            Arc::clone(&llm),
            Arc::clone(&embedder),
            Arc::clone(&limiter),
            tokenizer,
        );
        let functions = FunctionIndexEngine::new(
            config,
            Arc::clone(&checkpoints),
            Arc::clone(&store),
            llm,
            Arc::clone(&embedder),
            Arc::clone(&limiter),
        );
        let query = QueryEngine::new(store, embedder, limiter);

        Ok(Indexer { checkpoints, analyzer, files, functions, query })
    }

    /// Build an indexer from environment configuration.
    pub fn from_env() -> Result<Self> {
        let config = Config::from_env()?;
        let (llm, embedder) = build_providers(&config.provider, config.rate.request_timeout)?;
        Indexer::new(config, llm, embedder)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run (or resume) the iterative project analysis.
    pub async fn analyze_project(&self, root: &Path, force: bool) -> Result<ProjectAnalysis> {
        self.analyzer.analyze(root, force).await
    }

    /// Build the file index. Fails with a precondition error when the
    /// project analysis is missing or insufficient.
    pub async fn index_files(
        &self,
        root: &Path,
        force: bool,
        include: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> Result<FileIndexReport> {
        self.files.index_files(root, force, include, exclude).await
    }

    /// Build the function index. Requires the analysis and a non-empty
    /// file index.
    pub async fn index_functions(&self, root: &Path, force: bool) -> Result<FunctionIndexReport> {
        self.functions.index_functions(root, force).await
    }

    /// Sequential full build: analysis, then files, then functions.
    /// Continues past an incomplete analysis when its weakest field is
    /// confident enough; stops before functions when the file index failed
    /// outright.
    pub async fn full_index(&self, root: &Path, force: bool) -> Result<FullIndexReport> {
        let analysis = self.analyzer.analyze(root, force).await?;
        if !analysis.is_sufficient(STOP_OK) {
            return Err(Error::Precondition(format!(
                "analysis did not converge (min confidence {}%)",
                analysis.min_confidence()
            )));
        }

        let files = self.files.index_files(root, force, None, None).await?;
        if files.status == OpStatus::Failed {
            info!("File index failed outright, skipping function index");
            return Ok(FullIndexReport {
                status: OpStatus::Failed,
                analysis_completed: analysis.completed,
                min_confidence: analysis.min_confidence(),
                files,
                functions: None,
            });
        }

        let functions = self.functions.index_functions(root, force).await?;
        let status = match (files.status, functions.status) {
            (OpStatus::Success, OpStatus::Success) => OpStatus::Success,
            (OpStatus::Failed, _) | (_, OpStatus::Failed) => OpStatus::Failed,
            _ => OpStatus::Partial,
        };

        Ok(FullIndexReport {
            status,
            analysis_completed: analysis.completed,
            min_confidence: analysis.min_confidence(),
            files,
            functions: Some(functions),
        })
    }

    /// Re-index specific files in the file index and, when a function
    /// index exists, in that too.
    pub async fn update_files(&self, root: &Path, paths: &[String]) -> Result<UpdateReport> {
        let files = self.files.update_files(root, paths).await?;

        let project = root.canonicalize()?.to_string_lossy().to_string();
        let functions = if self.checkpoints.stats(IndexKind::Functions, &project)?.total > 0 {
            Some(self.functions.update_files(root, paths).await?)
        } else {
            None
        };

        Ok(UpdateReport { files, functions })
    }

    /// Remove files from every index that holds them.
    pub async fn remove_files(&self, root: &Path, paths: &[String]) -> Result<RemovalReport> {
        let file_documents = self.files.remove_files(root, paths).await?;
        let function_documents = self.functions.remove_files(root, paths).await?;
        Ok(RemovalReport { removed_files: paths.len(), file_documents, function_documents })
    }

    /// Aggregate checkpoint statistics for a project.
    pub fn check_status(&self, root: &Path) -> Result<StatusReport> {
        let project = root.canonicalize()?.to_string_lossy().to_string();
        let analysis = self.checkpoints.load_analysis(&project)?;

        let analysis_status = match &analysis {
            Some(a) => AnalysisStatus {
                status: if a.completed { "completed" } else { "pending" },
                iteration_count: a.iteration_count,
                min_confidence: a.min_confidence(),
                avg_confidence: a.avg_confidence(),
                files_analyzed: a.files_analyzed.len(),
            },
            None => AnalysisStatus {
                status: "missing",
                iteration_count: 0,
                min_confidence: 0,
                avg_confidence: 0,
                files_analyzed: 0,
            },
        };

        Ok(StatusReport {
            analysis: analysis_status,
            files: self.checkpoints.stats(IndexKind::Files, &project)?,
            functions: self.checkpoints.stats(IndexKind::Functions, &project)?,
        })
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    pub async fn search_files(
        &self,
        root: &Path,
        query: &str,
        top_k: usize,
        filters: MetaFilter,
        include_code: bool,
        dedup: bool,
    ) -> Result<Vec<FileHit>> {
        let root = root.canonicalize()?;
        self.query.search_files(&root, query, top_k, filters, include_code, dedup).await
    }

    pub async fn search_functions(
        &self,
        root: &Path,
        query: &str,
        top_k: usize,
        filters: MetaFilter,
        include_code: bool,
    ) -> Result<Vec<FunctionHit>> {
        let root = root.canonicalize()?;
        self.query.search_functions(&root, query, top_k, filters, include_code).await
    }
}
