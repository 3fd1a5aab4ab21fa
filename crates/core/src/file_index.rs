//! File index: per-file chunk → analyze → embed → upsert pipeline.
//!
//! Requires a sufficient project analysis. Files are processed under
//! bounded concurrency; within a file, chunks go through the pipeline in
//! index order. Each file's documents are upserted before its checkpoint is
//! written, so a completed row always means the artifacts are visible. A
//! per-file failure is recorded and never aborts the batch.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, IndexKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::providers::{extract_json, ChatMessage, EmbeddingProvider, JsonSchemaFormat, LlmProvider};
use crate::scan::{scan_project, scan_single_file};
use crate::tokenizer::Tokenizer;
use crate::types::{
    project_hash12, Chunk, FileIndexReport, FileKind, FileRecord, OpStatus, ProjectAnalysis,
    MAX_REPORTED_ERRORS,
};
use crate::vector::{
    collection_name, CollectionKind, Document, MetaValue, Metadata, VectorStore,
};
use crate::{analysis, chunk};

// ---------------------------------------------------------------------------
// Chunk analysis response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChunkAnalysis {
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub exported_symbols: Vec<String>,
    #[serde(default)]
    pub key_functions: Vec<KeyFunction>,
    #[serde(default)]
    pub architectural_notes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub return_type: String,
}

fn analysis_schema() -> JsonSchemaFormat {
    JsonSchemaFormat {
        name: "file_analysis".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "purpose": {"type": "string"},
                "dependencies": {"type": "array", "items": {"type": "string"}},
                "exported_symbols": {"type": "array", "items": {"type": "string"}},
                "key_functions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "parameters": {"type": "array", "items": {"type": "string"}},
                            "return_type": {"type": "string"}
                        },
                        "required": ["name", "description", "parameters", "return_type"],
                        "additionalProperties": false
                    }
                },
                "architectural_notes": {"type": "string"}
            },
            "required": ["purpose", "dependencies", "exported_symbols", "key_functions", "architectural_notes"],
            "additionalProperties": false
        }),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct FileIndexEngine {
    config: Config,
    checkpoints: Arc<CheckpointStore>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl FileIndexEngine {
    pub fn new(
        config: Config,
        checkpoints: Arc<CheckpointStore>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        FileIndexEngine { config, checkpoints, store, llm, embedder, limiter, tokenizer }
    }

    /// Load the project analysis and fail with a precondition error when it
    /// is missing or not confident enough to build on.
    fn require_analysis(&self, project: &str) -> Result<ProjectAnalysis> {
        let analysis = self.checkpoints.load_analysis(project)?.ok_or_else(|| {
            Error::Precondition("no project analysis found; run analyze first".into())
        })?;
        if !analysis.is_sufficient(analysis::STOP_OK) {
            return Err(Error::Precondition(format!(
                "project analysis incomplete (min confidence {}%); run analyze again",
                analysis.min_confidence()
            )));
        }
        Ok(analysis)
    }

    /// Index all eligible files in the project.
    pub async fn index_files(
        &self,
        root: &Path,
        force: bool,
        include: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> Result<FileIndexReport> {
        let started = Instant::now();
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        info!(project = project.as_str(), "Starting file indexing");

        let analysis = self.require_analysis(&project)?;
        let collection = collection_name(CollectionKind::Files, &root);

        let resumed = self.checkpoints.stats(IndexKind::Files, &project)?.completed > 0 && !force;
        if force {
            info!("Force reindex: clearing file index");
            self.store.drop_collection(&collection).await?;
            self.checkpoints.clear_kind(IndexKind::Files, &project)?;
        }

        // Project-context document so queries can retrieve the repository's
        // own description
        self.store_project_context(&collection, &root, &analysis).await?;

        // Scan with optional per-call pattern overrides
        let mut patterns = self.config.patterns.clone();
        if let Some(include) = include {
            patterns.include = include;
        }
        if let Some(extra) = exclude {
            patterns.exclude.extend(extra);
        }
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || scan_project(&scan_root, &patterns))
            .await
            .map_err(|e| Error::Provider(format!("scan task panicked: {e}")))??;

        let mut report = FileIndexReport {
            status: OpStatus::Success,
            total_files: files.len(),
            indexed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            resumed,
            total_chunks: 0,
            duration_ms: 0,
            errors: Vec::new(),
        };

        let mut queue = Vec::new();
        for file in files {
            if self.checkpoints.should_reindex(IndexKind::Files, &project, &file.rel_path, &file.hash)? {
                queue.push(file);
            } else {
                report.skipped_files += 1;
            }
        }
        info!(
            queued = queue.len(),
            skipped = report.skipped_files,
            "Scan filtered by checkpoints"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.indexing.max_concurrent_files));
        let mut tasks: JoinSet<(String, std::result::Result<usize, String>)> = JoinSet::new();

        for file in queue {
            let semaphore = Arc::clone(&semaphore);
            let engine = self.clone_refs();
            let project = project.clone();
            let collection = collection.clone();
            let root = root.clone();
            let analysis = analysis.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let rel = file.rel_path.clone();
                debug!(file = rel.as_str(), "Processing file");

                match engine.process_file(&root, &file, &analysis).await {
                    Ok(docs) => {
                        let count = docs.len();
                        let outcome = async {
                            engine.store.upsert(&collection, docs).await?;
                            engine.checkpoints.mark_file(
                                IndexKind::Files,
                                &project,
                                &rel,
                                &file.hash,
                                count,
                                None,
                            )?;
                            Ok::<_, Error>(())
                        }
                        .await;
                        match outcome {
                            Ok(()) => (rel, Ok(count)),
                            Err(e) => (rel, Err(e.to_string())),
                        }
                    }
                    Err(e) => {
                        warn!(file = rel.as_str(), error = %e, "File failed");
                        let record = engine.checkpoints.mark_file(
                            IndexKind::Files,
                            &project,
                            &rel,
                            &file.hash,
                            0,
                            Some(&e.to_string()),
                        );
                        if let Err(mark_err) = record {
                            warn!(file = rel.as_str(), error = %mark_err, "Failed to record checkpoint");
                        }
                        (rel, Err(e.to_string()))
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(chunks))) => {
                    report.indexed_files += 1;
                    report.total_chunks += chunks;
                }
                Ok((rel, Err(message))) => {
                    report.failed_files += 1;
                    if report.errors.len() < MAX_REPORTED_ERRORS {
                        report.errors.push(format!("{rel}: {message}"));
                    }
                }
                Err(e) => {
                    report.failed_files += 1;
                    if report.errors.len() < MAX_REPORTED_ERRORS {
                        report.errors.push(format!("task panicked: {e}"));
                    }
                }
            }
        }

        report.status = batch_status(report.indexed_files, report.failed_files);
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            indexed = report.indexed_files,
            failed = report.failed_files,
            skipped = report.skipped_files,
            chunks = report.total_chunks,
            "File indexing finished"
        );
        Ok(report)
    }

    /// Re-run the pipeline for specific files, replacing their documents.
    pub async fn update_files(&self, root: &Path, paths: &[String]) -> Result<FileIndexReport> {
        let started = Instant::now();
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        let analysis = self.require_analysis(&project)?;
        let collection = collection_name(CollectionKind::Files, &root);

        let mut report = FileIndexReport {
            status: OpStatus::Success,
            total_files: paths.len(),
            indexed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            resumed: false,
            total_chunks: 0,
            duration_ms: 0,
            errors: Vec::new(),
        };

        for rel in paths {
            let filter = vec![("relative_path".to_string(), MetaValue::from(rel.clone()))];
            let deleted = self.store.delete_where(&collection, &filter).await?;
            debug!(file = rel.as_str(), deleted, "Removed old documents");

            let file = match scan_single_file(&root, rel) {
                Ok(f) => f,
                Err(e) => {
                    report.failed_files += 1;
                    if report.errors.len() < MAX_REPORTED_ERRORS {
                        report.errors.push(format!("{rel}: {e}"));
                    }
                    continue;
                }
            };

            match self.process_file(&root, &file, &analysis).await {
                Ok(docs) => {
                    let count = docs.len();
                    self.store.upsert(&collection, docs).await?;
                    self.checkpoints.mark_file(
                        IndexKind::Files,
                        &project,
                        rel,
                        &file.hash,
                        count,
                        None,
                    )?;
                    report.indexed_files += 1;
                    report.total_chunks += count;
                }
                Err(e) => {
                    self.checkpoints.mark_file(
                        IndexKind::Files,
                        &project,
                        rel,
                        &file.hash,
                        0,
                        Some(&e.to_string()),
                    )?;
                    report.failed_files += 1;
                    if report.errors.len() < MAX_REPORTED_ERRORS {
                        report.errors.push(format!("{rel}: {e}"));
                    }
                }
            }
        }

        report.status = batch_status(report.indexed_files, report.failed_files);
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Delete all documents for the given files and clear their checkpoint
    /// rows. Returns the number of documents removed.
    pub async fn remove_files(&self, root: &Path, paths: &[String]) -> Result<usize> {
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        let collection = collection_name(CollectionKind::Files, &root);

        let mut removed = 0;
        for rel in paths {
            let filter = vec![("relative_path".to_string(), MetaValue::from(rel.clone()))];
            removed += self.store.delete_where(&collection, &filter).await?;
        }
        self.checkpoints.clear_file_rows(IndexKind::Files, &project, paths)?;
        info!(files = paths.len(), documents = removed, "Removed files from file index");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Per-file pipeline
    // -----------------------------------------------------------------------

    fn clone_refs(&self) -> FileIndexEngine {
        FileIndexEngine {
            config: self.config.clone(),
            checkpoints: Arc::clone(&self.checkpoints),
            store: Arc::clone(&self.store),
            llm: Arc::clone(&self.llm),
            embedder: Arc::clone(&self.embedder),
            limiter: Arc::clone(&self.limiter),
            tokenizer: Arc::clone(&self.tokenizer),
        }
    }

    async fn process_file(
        &self,
        root: &Path,
        file: &FileRecord,
        analysis: &ProjectAnalysis,
    ) -> Result<Vec<Document>> {
        let content = tokio::fs::read_to_string(&file.abs_path).await?;
        let chunks = chunk::chunk_file(
            &content,
            file.language,
            self.config.indexing.max_chunk_tokens,
            self.config.indexing.chunk_overlap_tokens,
            self.tokenizer.as_ref(),
        );

        let project_hash = project_hash12(root);
        let mut docs = Vec::with_capacity(chunks.len());

        // Chunks go through the pipeline strictly in index order
        for chunk in &chunks {
            self.limiter.acquire(1000, 1).await;
            let chunk_analysis = self.analyze_chunk(chunk, file, analysis).await?;

            let embedding_text = prepare_embedding_text(chunk, file, &chunk_analysis, analysis);
            self.limiter.acquire(500, 1).await;
            let embedding = self
                .limiter
                .execute_with_retry(|| async {
                    self.embedder.create_embedding(&embedding_text).await
                })
                .await?;

            let mut metadata = Metadata::new();
            metadata.insert("relative_path".into(), MetaValue::from(file.rel_path.clone()));
            metadata.insert("chunk_index".into(), MetaValue::from(chunk.index));
            metadata.insert("total_chunks".into(), MetaValue::from(chunk.total));
            metadata.insert("start_line".into(), MetaValue::from(chunk.start_line));
            metadata.insert("end_line".into(), MetaValue::from(chunk.end_line));
            metadata.insert("language".into(), MetaValue::from(file.language.as_str()));
            metadata.insert("file_type".into(), MetaValue::from(file.kind.as_str()));
            metadata.insert("file_size".into(), MetaValue::from(file.size as i64));
            metadata.insert("last_modified".into(), MetaValue::from(file.modified));
            metadata.insert("hash".into(), MetaValue::from(file.hash.clone()));
            metadata.insert("purpose".into(), MetaValue::from(chunk_analysis.purpose.clone()));
            metadata
                .insert("dependencies".into(), MetaValue::from_list(&chunk_analysis.dependencies));
            metadata.insert(
                "exported_symbols".into(),
                MetaValue::from_list(&chunk_analysis.exported_symbols),
            );
            metadata.insert("index_type".into(), MetaValue::from("files"));

            docs.push(Document {
                id: format!("files:{project_hash}:{}:{}", file.rel_path, chunk.index),
                text: chunk.content.clone(),
                embedding,
                metadata,
            });
        }

        Ok(docs)
    }

    /// One LLM analysis call for a chunk. Provider failures propagate (the
    /// file becomes a failed unit); a malformed response degrades to an
    /// empty analysis rather than dropping the chunk.
    async fn analyze_chunk(
        &self,
        chunk: &Chunk,
        file: &FileRecord,
        analysis: &ProjectAnalysis,
    ) -> Result<ChunkAnalysis> {
        let prompt = build_chunk_prompt(chunk, file, analysis);
        let schema = analysis_schema();
        let messages = [
            ChatMessage::system(
                "You are a code analysis expert. Analyze code and provide structured JSON output.",
            ),
            ChatMessage::user(prompt),
        ];

        let response = self
            .limiter
            .execute_with_retry(|| async {
                self.llm.chat_completion(&messages, Some(&schema), false).await
            })
            .await?;

        match extract_json(&response.content)
            .and_then(|v| serde_json::from_value::<ChunkAnalysis>(v).map_err(Error::from))
        {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(file = file.rel_path.as_str(), error = %e, "Unparseable chunk analysis, degrading");
                Ok(ChunkAnalysis::default())
            }
        }
    }

    async fn store_project_context(
        &self,
        collection: &str,
        root: &Path,
        analysis: &ProjectAnalysis,
    ) -> Result<()> {
        let text = analysis.context_text();
        self.limiter.acquire(200, 1).await;
        let embedding = self
            .limiter
            .execute_with_retry(|| async { self.embedder.create_embedding(&text).await })
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert("relative_path".into(), MetaValue::from("__project_context__"));
        metadata.insert("chunk_index".into(), MetaValue::from(0usize));
        metadata.insert("total_chunks".into(), MetaValue::from(1usize));
        metadata.insert("file_type".into(), MetaValue::from("project_context"));
        metadata.insert("project_name".into(), MetaValue::from(analysis.project_name()));
        metadata.insert(
            "project_description".into(),
            MetaValue::from(analysis.description.value.clone().unwrap_or_default()),
        );
        metadata.insert(
            "languages".into(),
            MetaValue::from_list(analysis.languages.value.as_deref().unwrap_or_default()),
        );
        metadata.insert(
            "frameworks".into(),
            MetaValue::from_list(analysis.frameworks.value.as_deref().unwrap_or_default()),
        );
        metadata.insert(
            "architecture".into(),
            MetaValue::from(analysis.architecture.value.clone().unwrap_or_default()),
        );
        metadata.insert("index_type".into(), MetaValue::from("files"));

        let project_hash = project_hash12(root);
        self.store
            .upsert(
                collection,
                vec![Document {
                    id: format!("files:{project_hash}:__project_context__:0"),
                    text,
                    embedding,
                    metadata,
                }],
            )
            .await?;
        debug!("Project context stored in files collection");
        Ok(())
    }
}

/// Success / partial / failed from unit counts: failed only when nothing
/// progressed at all.
pub(crate) fn batch_status(succeeded: usize, failed: usize) -> OpStatus {
    if failed == 0 {
        OpStatus::Success
    } else if succeeded > 0 {
        OpStatus::Partial
    } else {
        OpStatus::Failed
    }
}

// ---------------------------------------------------------------------------
// Prompts and embedding text
// ---------------------------------------------------------------------------

fn build_chunk_prompt(chunk: &Chunk, file: &FileRecord, analysis: &ProjectAnalysis) -> String {
    let context = format!(
        "PROJECT CONTEXT:\n- Project: {}\n- Description: {}\n- Languages: {}\n- Frameworks: {}\n- Architecture: {}\n",
        analysis.project_name(),
        analysis.description.value.as_deref().unwrap_or(""),
        analysis.languages.value.as_deref().unwrap_or_default().join(", "),
        analysis.frameworks.value.as_deref().unwrap_or_default().join(", "),
        analysis.architecture.value.as_deref().unwrap_or(""),
    );

    let chunk_note = if chunk.total > 1 {
        format!(" (chunk {}/{}, lines {}-{})", chunk.index + 1, chunk.total, chunk.start_line, chunk.end_line)
    } else {
        String::new()
    };

    let body = truncate_str(&chunk.content, 8000);
    match file.kind {
        FileKind::Documentation => format!(
            "{context}\nDOCUMENTATION FILE: {}{chunk_note}\n\nContent:\n{body}\n\n\
             Analyze this documentation. Report its purpose, the topics it covers as exported_symbols, \
             and its relevance to the project as architectural_notes.\n",
            file.rel_path,
        ),
        FileKind::Config => format!(
            "{context}\nCONFIGURATION FILE: {}{chunk_note}\n\nContent:\n{body}\n\n\
             Analyze this configuration file. Report what it controls as purpose, the services or \
             tools configured as dependencies, and its impact on the architecture as architectural_notes.\n",
            file.rel_path,
        ),
        _ => format!(
            "{context}\nFILE TO ANALYZE: {}{chunk_note}\nLANGUAGE: {}\n\nCode:\n```{}\n{body}\n```\n\n\
             Analyze this code in the context of the overall project: its purpose, imported \
             dependencies, exported symbols, key functions, and architectural notes. Be concise but informative.\n",
            file.rel_path,
            file.language.as_str(),
            file.language.as_str(),
        ),
    }
}

/// Combined text representation used for the chunk embedding.
fn prepare_embedding_text(
    chunk: &Chunk,
    file: &FileRecord,
    analysis: &ChunkAnalysis,
    project: &ProjectAnalysis,
) -> String {
    let mut parts = Vec::new();
    parts.push(format!("Project: {}", project.project_name()));
    if let Some(langs) = project.languages.value.as_deref() {
        if !langs.is_empty() {
            parts.push(format!("Stack: {}", langs[..langs.len().min(5)].join(", ")));
        }
    }
    parts.push(format!("File: {}", file.rel_path));
    if !analysis.purpose.is_empty() {
        parts.push(format!("Purpose: {}", analysis.purpose));
    }
    if !analysis.exported_symbols.is_empty() {
        let shown = &analysis.exported_symbols[..analysis.exported_symbols.len().min(10)];
        parts.push(format!("Exports: {}", shown.join(", ")));
    }
    if !analysis.dependencies.is_empty() {
        let shown = &analysis.dependencies[..analysis.dependencies.len().min(10)];
        parts.push(format!("Dependencies: {}", shown.join(", ")));
    }
    if !analysis.key_functions.is_empty() {
        let summaries: Vec<String> = analysis
            .key_functions
            .iter()
            .take(5)
            .map(|f| format!("{}({}): {}", f.name, f.parameters.join(", "), f.description))
            .collect();
        parts.push(format!("Functions:\n{}", summaries.join("\n")));
    }
    parts.push(format!("\nCode:\n{}", truncate_str(&chunk.content, 2000)));
    parts.join("\n")
}

fn truncate_str(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    #[test]
    fn test_batch_status() {
        assert_eq!(batch_status(3, 0), OpStatus::Success);
        assert_eq!(batch_status(0, 0), OpStatus::Success);
        assert_eq!(batch_status(2, 1), OpStatus::Partial);
        assert_eq!(batch_status(0, 3), OpStatus::Failed);
    }

    #[test]
    fn test_embedding_text_shape() {
        let chunk = Chunk {
            content: "def f(): pass".into(),
            index: 0,
            total: 1,
            start_line: 1,
            end_line: 1,
        };
        let file = FileRecord {
            abs_path: "/p/a.py".into(),
            rel_path: "a.py".into(),
            language: Language::Python,
            kind: FileKind::Code,
            size: 13,
            modified: 0.0,
            hash: "h".into(),
        };
        let mut analysis = ChunkAnalysis::default();
        analysis.purpose = "defines f".into();
        analysis.exported_symbols = vec!["f".into()];
        let mut project = ProjectAnalysis::new("/p");
        project.languages.merge(Some(vec!["Python".into()]), 90);

        let text = prepare_embedding_text(&chunk, &file, &analysis, &project);
        assert!(text.contains("File: a.py"));
        assert!(text.contains("Purpose: defines f"));
        assert!(text.contains("Exports: f"));
        assert!(text.contains("def f(): pass"));
    }

    #[test]
    fn test_prompt_varies_by_kind() {
        let chunk = Chunk {
            content: "content".into(),
            index: 0,
            total: 1,
            start_line: 1,
            end_line: 1,
        };
        let project = ProjectAnalysis::new("/p");
        let mut file = FileRecord {
            abs_path: "/p/README.md".into(),
            rel_path: "README.md".into(),
            language: Language::Markdown,
            kind: FileKind::Documentation,
            size: 7,
            modified: 0.0,
            hash: "h".into(),
        };
        assert!(build_chunk_prompt(&chunk, &file, &project).contains("DOCUMENTATION FILE"));

        file.kind = FileKind::Config;
        assert!(build_chunk_prompt(&chunk, &file, &project).contains("CONFIGURATION FILE"));

        file.kind = FileKind::Code;
        assert!(build_chunk_prompt(&chunk, &file, &project).contains("FILE TO ANALYZE"));
    }
}
