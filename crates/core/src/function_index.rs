//! Function index: AST extraction plus per-function LLM analysis.
//!
//! Requires a sufficient project analysis and a non-empty file index. Source
//! files are processed under the outer concurrency bound; inside a file,
//! function analyses run under the inner bound. A function whose analysis
//! fails degrades to a minimal record instead of being dropped; a file that
//! fails outright becomes a failed checkpoint row and is retried next run.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ast::resolve::{resolution_stats, CallResolver};
use crate::ast::{extractor_for, FileSyntax};
use crate::checkpoint::{CheckpointStore, IndexKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_index::batch_status;
use crate::limiter::RateLimiter;
use crate::providers::{extract_json, ChatMessage, EmbeddingProvider, JsonSchemaFormat, LlmProvider};
use crate::scan::scan_project;
use crate::triggers::{classify_layer, format_trigger, TriggerDetector};
use crate::types::{
    function_hash8, project_hash12, FileKind, FileRecord, FunctionIndexReport, FunctionRecord,
    OpStatus, ProjectAnalysis, MAX_REPORTED_ERRORS,
};
use crate::vector::{
    collection_name, CollectionKind, Document, MetaValue, Metadata, VectorStore,
};
use crate::analysis;

// ---------------------------------------------------------------------------
// Function analysis response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionAnalysis {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub input_description: String,
    #[serde(default)]
    pub output_description: String,
    #[serde(default)]
    pub side_effects: Vec<String>,
    #[serde(default = "default_complexity")]
    pub complexity: String,
}

fn default_complexity() -> String {
    "medium".to_string()
}

impl FunctionAnalysis {
    /// Minimal analysis used when the LLM cannot produce a valid one.
    /// No function is dropped from the index.
    fn fallback(function: &FunctionRecord) -> Self {
        FunctionAnalysis {
            description: function
                .docstring
                .clone()
                .unwrap_or_else(|| format!("Function {}", function.name)),
            purpose: String::new(),
            input_description: String::new(),
            output_description: String::new(),
            side_effects: Vec::new(),
            complexity: "medium".to_string(),
        }
    }
}

fn function_schema() -> JsonSchemaFormat {
    JsonSchemaFormat {
        name: "function_analysis".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "purpose": {"type": "string"},
                "input_description": {"type": "string"},
                "output_description": {"type": "string"},
                "side_effects": {"type": "array", "items": {"type": "string"}},
                "complexity": {"type": "string", "enum": ["low", "medium", "high"]}
            },
            "required": ["description", "purpose", "input_description",
                         "output_description", "side_effects", "complexity"],
            "additionalProperties": false
        }),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct FunctionIndexEngine {
    config: Config,
    checkpoints: Arc<CheckpointStore>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
}

impl FunctionIndexEngine {
    pub fn new(
        config: Config,
        checkpoints: Arc<CheckpointStore>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        FunctionIndexEngine { config, checkpoints, store, llm, embedder, limiter }
    }

    /// Both upstream indexes must be in place before functions are indexed.
    fn require_prerequisites(&self, project: &str) -> Result<ProjectAnalysis> {
        let analysis = self.checkpoints.load_analysis(project)?.ok_or_else(|| {
            Error::Precondition("no project analysis found; run analyze first".into())
        })?;
        if !analysis.is_sufficient(analysis::STOP_OK) {
            return Err(Error::Precondition(format!(
                "project analysis incomplete (min confidence {}%)",
                analysis.min_confidence()
            )));
        }
        let file_stats = self.checkpoints.stats(IndexKind::Files, project)?;
        if file_stats.completed == 0 {
            return Err(Error::Precondition(
                "file index is empty; run index-files before index-functions".into(),
            ));
        }
        Ok(analysis)
    }

    /// Index every function in the project's source files.
    pub async fn index_functions(&self, root: &Path, force: bool) -> Result<FunctionIndexReport> {
        let started = Instant::now();
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        info!(project = project.as_str(), "Starting function indexing");

        let analysis = self.require_prerequisites(&project)?;
        let collection = collection_name(CollectionKind::Functions, &root);

        let resumed =
            self.checkpoints.stats(IndexKind::Functions, &project)?.completed > 0 && !force;
        if force {
            info!("Force reindex: clearing function index");
            self.store.drop_collection(&collection).await?;
            self.checkpoints.clear_kind(IndexKind::Functions, &project)?;
        }

        let patterns = self.config.patterns.clone();
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || scan_project(&scan_root, &patterns))
            .await
            .map_err(|e| Error::Provider(format!("scan task panicked: {e}")))??;

        // Only source-code files carry functions
        let code_files: Vec<FileRecord> = files
            .into_iter()
            .filter(|f| f.kind == FileKind::Code && f.language.is_source())
            .collect();

        let mut report = FunctionIndexReport {
            status: OpStatus::Success,
            total_files: code_files.len(),
            processed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            resumed,
            total_functions: 0,
            indexed_functions: 0,
            duration_ms: 0,
            errors: Vec::new(),
        };

        let mut queue = Vec::new();
        for file in code_files {
            if self
                .checkpoints
                .should_reindex(IndexKind::Functions, &project, &file.rel_path, &file.hash)?
            {
                queue.push(file);
            } else {
                report.skipped_files += 1;
            }
        }
        info!(queued = queue.len(), skipped = report.skipped_files, "Files queued for function extraction");

        let semaphore = Arc::new(Semaphore::new(self.config.indexing.max_concurrent_files));
        let mut tasks: JoinSet<(String, std::result::Result<(usize, usize), String>)> =
            JoinSet::new();

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

                match engine.process_file(&root, &file, &analysis, &collection).await {
                    Ok((total, indexed)) => {
                        let marked = engine.checkpoints.mark_file(
                            IndexKind::Functions,
                            &project,
                            &rel,
                            &file.hash,
                            total,
                            None,
                        );
                        match marked {
                            Ok(()) => (rel, Ok((total, indexed))),
                            Err(e) => (rel, Err(e.to_string())),
                        }
                    }
                    Err(e) => {
                        warn!(file = rel.as_str(), error = %e, "Function extraction failed");
                        if let Err(mark_err) = engine.checkpoints.mark_file(
                            IndexKind::Functions,
                            &project,
                            &rel,
                            &file.hash,
                            0,
                            Some(&e.to_string()),
                        ) {
                            warn!(file = rel.as_str(), error = %mark_err, "Failed to record checkpoint");
                        }
                        (rel, Err(e.to_string()))
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok((total, indexed)))) => {
                    report.processed_files += 1;
                    report.total_functions += total;
                    report.indexed_functions += indexed;
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

        report.status = batch_status(report.processed_files, report.failed_files);
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = report.processed_files,
            failed = report.failed_files,
            functions = report.indexed_functions,
            "Function indexing finished"
        );
        Ok(report)
    }

    /// Re-index functions for specific files by clearing their checkpoint
    /// rows and re-running the incremental pipeline.
    pub async fn update_files(&self, root: &Path, paths: &[String]) -> Result<FunctionIndexReport> {
        let canonical = root.canonicalize()?;
        let project = canonical.to_string_lossy().to_string();
        let collection = collection_name(CollectionKind::Functions, &canonical);

        // Old documents for these files are replaced wholesale
        for rel in paths {
            let filter = vec![("relative_path".to_string(), MetaValue::from(rel.clone()))];
            self.store.delete_where(&collection, &filter).await?;
        }
        self.checkpoints.clear_file_rows(IndexKind::Functions, &project, paths)?;

        self.index_functions(root, false).await
    }

    /// Delete all function documents for the given files.
    pub async fn remove_files(&self, root: &Path, paths: &[String]) -> Result<usize> {
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        let collection = collection_name(CollectionKind::Functions, &root);

        let mut removed = 0;
        for rel in paths {
            let filter = vec![("relative_path".to_string(), MetaValue::from(rel.clone()))];
            removed += self.store.delete_where(&collection, &filter).await?;
        }
        self.checkpoints.clear_file_rows(IndexKind::Functions, &project, paths)?;
        info!(files = paths.len(), documents = removed, "Removed files from function index");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Per-file pipeline
    // -----------------------------------------------------------------------

    fn clone_refs(&self) -> FunctionIndexEngine {
        FunctionIndexEngine {
            config: self.config.clone(),
            checkpoints: Arc::clone(&self.checkpoints),
            store: Arc::clone(&self.store),
            llm: Arc::clone(&self.llm),
            embedder: Arc::clone(&self.embedder),
            limiter: Arc::clone(&self.limiter),
        }
    }

    /// Extract, analyze, embed, and upsert one file's functions. Returns
    /// (functions extracted, functions indexed).
    async fn process_file(
        &self,
        root: &Path,
        file: &FileRecord,
        analysis: &ProjectAnalysis,
        collection: &str,
    ) -> Result<(usize, usize)> {
        let content = tokio::fs::read_to_string(&file.abs_path).await?;

        // CPU-bound AST traversal runs off the scheduler thread
        let language = file.language;
        let rel_path = file.rel_path.clone();
        let source = content.clone();
        let syntax: FileSyntax = tokio::task::spawn_blocking(move || {
            extractor_for(language).extract(&source, &rel_path)
        })
        .await
        .map_err(|e| Error::Provider(format!("extraction task panicked: {e}")))??;

        if syntax.functions.is_empty() {
            debug!(file = file.rel_path.as_str(), "No functions found");
            return Ok((0, 0));
        }
        info!(file = file.rel_path.as_str(), functions = syntax.functions.len(), "Functions extracted");

        let detector = TriggerDetector::new();
        let triggers = detector.detect(&content, file.language);

        // Resolve in-file call edges so each function document carries its
        // known callees
        let resolved_by_caller: std::collections::HashMap<String, Vec<String>> = {
            let functions_map = std::collections::HashMap::from([(
                file.rel_path.clone(),
                syntax.functions.clone(),
            )]);
            let imports_map =
                std::collections::HashMap::from([(file.rel_path.clone(), syntax.imports)]);
            let resolver = CallResolver::new(root, &functions_map, &imports_map);
            let resolved = resolver.resolve_file(&file.rel_path, &syntax.calls, file.language);
            let stats = resolution_stats(&resolved);
            debug!(
                file = file.rel_path.as_str(),
                total = stats["total"],
                high = stats["high"],
                "Call edges resolved"
            );

            let mut grouped: std::collections::HashMap<String, Vec<String>> =
                std::collections::HashMap::new();
            for call in resolved {
                // caller_id is "{file}::{name}::{line}"
                if let Some(name) = call.caller_id.rsplitn(3, "::").nth(1) {
                    grouped.entry(name.to_string()).or_default().push(call.callee_id);
                }
            }
            grouped
        };

        let total = syntax.functions.len();
        let project_hash = project_hash12(root);
        let inner = Arc::new(Semaphore::new(self.config.indexing.max_concurrent_functions));
        let calls = Arc::new(syntax.calls);
        let mut tasks: JoinSet<Option<Document>> = JoinSet::new();

        for function in syntax.functions {
            let inner = Arc::clone(&inner);
            let engine = self.clone_refs();
            let analysis = analysis.clone();
            let project_hash = project_hash.clone();
            let trigger = triggers
                .iter()
                .find(|t| t.function_name == function.name)
                .cloned();
            let resolved_calls =
                resolved_by_caller.get(&function.name).cloned().unwrap_or_default();
            let calls = Arc::clone(&calls);
            let language = file.language;

            tasks.spawn(async move {
                let _permit = inner.acquire().await.expect("semaphore closed");

                let func_analysis = engine.analyze_function(&function, &analysis).await;

                let embedding_text =
                    prepare_embedding_text(&function, &func_analysis, &analysis);
                engine.limiter.acquire(500, 1).await;
                let embedding = engine
                    .limiter
                    .execute_with_retry(|| async {
                        engine.embedder.create_embedding(&embedding_text).await
                    })
                    .await;
                let embedding = match embedding {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(function = function.name.as_str(), error = %e, "Embedding failed, skipping function");
                        return None;
                    }
                };

                let layer =
                    classify_layer(&function, language, trigger.is_some(), calls.as_ref());

                let mut metadata = Metadata::new();
                metadata.insert("function_name".into(), MetaValue::from(function.name.clone()));
                metadata
                    .insert("relative_path".into(), MetaValue::from(function.rel_path.clone()));
                metadata.insert("line_start".into(), MetaValue::from(function.line_start));
                metadata.insert("line_end".into(), MetaValue::from(function.line_end));
                metadata.insert("parameters".into(), MetaValue::from_list(&function.parameters));
                metadata.insert(
                    "return_type".into(),
                    MetaValue::from(function.return_type.clone().unwrap_or_default()),
                );
                metadata.insert("is_async".into(), MetaValue::from(function.is_async));
                metadata.insert("is_method".into(), MetaValue::from(function.is_method));
                metadata.insert(
                    "class_name".into(),
                    MetaValue::from(function.class_name.clone().unwrap_or_default()),
                );
                metadata.insert("decorators".into(), MetaValue::from_list(&function.decorators));
                metadata.insert(
                    "docstring".into(),
                    MetaValue::from(function.docstring.clone().unwrap_or_default()),
                );
                metadata.insert("language".into(), MetaValue::from(language.as_str()));
                metadata.insert("layer".into(), MetaValue::from(layer.as_str()));
                metadata.insert(
                    "signature".into(),
                    MetaValue::from(extractor_for(language).format_signature(
                        &function.name,
                        &function.parameters,
                        function.return_type.as_deref(),
                    )),
                );
                metadata.insert("resolved_calls".into(), MetaValue::from_list(&resolved_calls));
                if let Some(trigger) = &trigger {
                    metadata
                        .insert("trigger_kind".into(), MetaValue::from(trigger.kind.as_str()));
                    metadata.insert("trigger".into(), MetaValue::from(format_trigger(trigger)));
                }
                metadata
                    .insert("description".into(), MetaValue::from(func_analysis.description.clone()));
                metadata.insert("purpose".into(), MetaValue::from(func_analysis.purpose.clone()));
                metadata.insert(
                    "input_description".into(),
                    MetaValue::from(func_analysis.input_description.clone()),
                );
                metadata.insert(
                    "output_description".into(),
                    MetaValue::from(func_analysis.output_description.clone()),
                );
                metadata
                    .insert("side_effects".into(), MetaValue::from_list(&func_analysis.side_effects));
                metadata.insert("complexity".into(), MetaValue::from(func_analysis.complexity.clone()));
                metadata.insert("index_type".into(), MetaValue::from("functions"));

                let func_hash =
                    function_hash8(&function.rel_path, &function.name, function.line_start);
                Some(Document {
                    id: format!("func:{project_hash}:{func_hash}"),
                    text: function.source.clone(),
                    embedding,
                    metadata,
                })
            });
        }

        let mut docs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Function analysis task panicked"),
            }
        }

        let indexed = docs.len();
        self.store.upsert(collection, docs).await?;
        Ok((total, indexed))
    }

    /// LLM analysis for one function. Schema violations and provider
    /// failures both degrade to the minimal fallback after retries.
    async fn analyze_function(
        &self,
        function: &FunctionRecord,
        analysis: &ProjectAnalysis,
    ) -> FunctionAnalysis {
        self.limiter.acquire(1500, 1).await;

        let prompt = build_function_prompt(function, analysis);
        let schema = function_schema();
        let messages = [
            ChatMessage::system(
                "You are a code analysis expert. Analyze the function and return JSON.",
            ),
            ChatMessage::user(prompt),
        ];

        let response = self
            .limiter
            .execute_with_retry(|| async {
                self.llm.chat_completion(&messages, Some(&schema), false).await
            })
            .await;

        match response {
            Ok(r) => match extract_json(&r.content)
                .and_then(|v| serde_json::from_value::<FunctionAnalysis>(v).map_err(Error::from))
            {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(function = function.name.as_str(), error = %e, "Invalid function analysis, using fallback");
                    FunctionAnalysis::fallback(function)
                }
            },
            Err(e) => {
                warn!(function = function.name.as_str(), error = %e, "Function analysis failed, using fallback");
                FunctionAnalysis::fallback(function)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt and embedding text
// ---------------------------------------------------------------------------

fn build_function_prompt(function: &FunctionRecord, analysis: &ProjectAnalysis) -> String {
    let mut extras = String::new();
    if let Some(doc) = &function.docstring {
        extras.push_str(&format!("DOCSTRING: {doc}\n"));
    }
    if let Some(class) = &function.class_name {
        extras.push_str(&format!("CLASS: {class}\n"));
    }
    if !function.decorators.is_empty() {
        extras.push_str(&format!("DECORATORS: {}\n", function.decorators.join(", ")));
    }

    format!(
        "Analyze this function from the {name} project.\n\n\
         PROJECT CONTEXT:\n- Name: {name}\n- Languages: {langs}\n- Frameworks: {frameworks}\n- Purpose: {purpose}\n\n\
         FILE: {file}\n\nFUNCTION:\n```\n{code}\n```\n\n{extras}\n\
         Analyze and return JSON:\n\
         {{\n\
           \"description\": \"Brief description of what this function does (1-2 sentences)\",\n\
           \"purpose\": \"Why does this function exist in the project context?\",\n\
           \"input_description\": \"What are the inputs and their expected types/formats?\",\n\
           \"output_description\": \"What is returned and when?\",\n\
           \"side_effects\": [\"list of side effects like database writes, API calls, etc.\"],\n\
           \"complexity\": \"low|medium|high (based on logic complexity)\"\n\
         }}\n",
        name = analysis.project_name(),
        langs = analysis.languages.value.as_deref().unwrap_or_default().join(", "),
        frameworks = analysis.frameworks.value.as_deref().unwrap_or_default().join(", "),
        purpose = analysis.description.value.as_deref().unwrap_or(""),
        file = function.rel_path,
        code = function.source,
    )
}

fn prepare_embedding_text(
    function: &FunctionRecord,
    analysis: &FunctionAnalysis,
    project: &ProjectAnalysis,
) -> String {
    let mut parts = vec![
        format!("Function: {}", function.name),
        format!("Project: {}", project.project_name()),
        format!("Description: {}", analysis.description),
        format!("Purpose: {}", analysis.purpose),
    ];
    if let Some(class) = &function.class_name {
        parts.push(format!("Class: {class}"));
    }
    if !function.parameters.is_empty() {
        parts.push(format!("Parameters: {}", function.parameters.join(", ")));
    }
    if !analysis.input_description.is_empty() {
        parts.push(format!("Input: {}", analysis.input_description));
    }
    if !analysis.output_description.is_empty() {
        parts.push(format!("Output: {}", analysis.output_description));
    }
    let snippet = if function.source.len() > 500 {
        let mut end = 500;
        while !function.source.is_char_boundary(end) {
            end -= 1;
        }
        &function.source[..end]
    } else {
        &function.source
    };
    parts.push(format!("Code:\n{snippet}"));
    parts.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str) -> FunctionRecord {
        FunctionRecord {
            name: name.into(),
            rel_path: "src/a.py".into(),
            line_start: 3,
            line_end: 9,
            source: "def f(x):\n    return x\n".into(),
            parameters: vec!["x".into()],
            return_type: None,
            is_async: false,
            is_method: false,
            class_name: None,
            decorators: Vec::new(),
            docstring: Some("Returns x.".into()),
        }
    }

    #[test]
    fn test_fallback_uses_docstring() {
        let f = function("f");
        let fallback = FunctionAnalysis::fallback(&f);
        assert_eq!(fallback.description, "Returns x.");
        assert_eq!(fallback.complexity, "medium");

        let mut bare = function("g");
        bare.docstring = None;
        assert_eq!(FunctionAnalysis::fallback(&bare).description, "Function g");
    }

    #[test]
    fn test_embedding_text_contains_signature_bits() {
        let f = function("transform");
        let analysis = FunctionAnalysis {
            description: "transforms input".into(),
            purpose: "data cleanup".into(),
            input_description: "a value".into(),
            output_description: "the value".into(),
            side_effects: Vec::new(),
            complexity: "low".into(),
        };
        let project = ProjectAnalysis::new("/p");
        let text = prepare_embedding_text(&f, &analysis, &project);
        assert!(text.contains("Function: transform"));
        assert!(text.contains("Parameters: x"));
        assert!(text.contains("Description: transforms input"));
        assert!(text.contains("Code:"));
    }

    #[test]
    fn test_function_prompt_mentions_context() {
        let f = function("f");
        let mut project = ProjectAnalysis::new("/tmp/myproj");
        project.frameworks.merge(Some(vec!["FastAPI".into()]), 80);
        let prompt = build_function_prompt(&f, &project);
        assert!(prompt.contains("FastAPI"));
        assert!(prompt.contains("FILE: src/a.py"));
        assert!(prompt.contains("DOCSTRING: Returns x."));
    }
}
