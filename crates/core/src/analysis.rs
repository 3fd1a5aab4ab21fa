//! Iterative project analysis.
//!
//! Builds a structured understanding of a repository by repeatedly reading
//! batches of files, asking the LLM to refine six confidence-scored fields,
//! and merging responses monotonically. The loop stops when the weakest
//! field is confident enough (or the model has nothing left to read), and
//! every iteration is snapshotted so an interrupted run resumes where it
//! stopped.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::providers::{extract_json, ChatMessage, JsonSchemaFormat, LlmProvider};
use crate::types::ProjectAnalysis;

// ---------------------------------------------------------------------------
// Tuning constants
// ---------------------------------------------------------------------------

pub const MAX_ITERATIONS: u32 = 10;
pub const MAX_FILES_PER_ITERATION: usize = 20;
/// Minimum field confidence for a clean stop.
pub const STOP_HIGH: u8 = 90;
/// Minimum field confidence accepted once the file queue runs dry.
pub const STOP_OK: u8 = 70;
/// Average confidence accepted after exhausting iterations.
pub const STOP_AVG: u8 = 80;

const LLM_RETRIES: u32 = 3;
const MAX_CONTENT_BYTES: usize = 10_000;
const MAX_TREE_DEPTH: usize = 4;
const MAX_TREE_ITEMS_PER_DIR: usize = 30;

/// Files read in the first iteration: docs, manifests, build config.
const FIRST_LEVEL_FILES: &[&str] = &[
    "README.md", "README.rst", "README.txt", "README",
    "ARCHITECTURE.md", "docs/README.md", "docs/index.md",
    "pyproject.toml", "setup.py", "setup.cfg", "requirements.txt", "Pipfile",
    "package.json", "tsconfig.json",
    "Cargo.toml",
    "go.mod",
    "pom.xml", "build.gradle", "build.gradle.kts", "settings.gradle.kts",
    "Dockerfile", "docker-compose.yml", "docker-compose.yaml",
    "Makefile", ".env.example", "config.yaml", "config.json",
];

/// Directories whose first-level files join the first iteration.
const FIRST_LEVEL_DIRS: &[&str] = &["src", "lib", "app", "cmd", "internal", "pkg"];

/// Directories never rendered in the project tree.
const IGNORED_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", "node_modules", "vendor", "venv", ".venv", "env",
    "__pycache__", ".pytest_cache", ".mypy_cache", "build", "dist", "target",
    "out", "bin", ".idea", ".vscode", ".vs", "coverage", ".coverage", "htmlcov",
    ".gradle", ".mvn",
];

// ---------------------------------------------------------------------------
// LLM response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    project_description: Option<String>,
    project_description_confidence: i64,
    languages: Option<Vec<String>>,
    languages_confidence: i64,
    frameworks: Option<Vec<String>>,
    frameworks_confidence: i64,
    modules: Option<Vec<String>>,
    modules_confidence: i64,
    entry_points: Option<Vec<String>>,
    entry_points_confidence: i64,
    architecture: Option<String>,
    architecture_confidence: i64,
    #[serde(default)]
    next_path: Option<Vec<String>>,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

impl AnalysisResponse {
    /// All confidence values must be integers in [0, 100].
    fn validate(&self) -> std::result::Result<(), String> {
        let fields = [
            ("project_description_confidence", self.project_description_confidence),
            ("languages_confidence", self.languages_confidence),
            ("frameworks_confidence", self.frameworks_confidence),
            ("modules_confidence", self.modules_confidence),
            ("entry_points_confidence", self.entry_points_confidence),
            ("architecture_confidence", self.architecture_confidence),
        ];
        for (name, value) in fields {
            if !(0..=100).contains(&value) {
                return Err(format!("invalid confidence for {name}: {value}"));
            }
        }
        Ok(())
    }
}

fn response_schema() -> JsonSchemaFormat {
    let string_or_null = serde_json::json!({"type": ["string", "null"]});
    let list_or_null =
        serde_json::json!({"type": ["array", "null"], "items": {"type": "string"}});
    let confidence = serde_json::json!({"type": "integer"});

    JsonSchemaFormat {
        name: "project_analysis".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "project_description": string_or_null,
                "project_description_confidence": confidence,
                "languages": list_or_null,
                "languages_confidence": confidence,
                "frameworks": list_or_null,
                "frameworks_confidence": confidence,
                "modules": list_or_null,
                "modules_confidence": confidence,
                "entry_points": list_or_null,
                "entry_points_confidence": confidence,
                "architecture": string_or_null,
                "architecture_confidence": confidence,
                "next_path": list_or_null,
                "reasoning": {"type": "string"}
            },
            "required": [
                "project_description", "project_description_confidence",
                "languages", "languages_confidence",
                "frameworks", "frameworks_confidence",
                "modules", "modules_confidence",
                "entry_points", "entry_points_confidence",
                "architecture", "architecture_confidence",
                "next_path", "reasoning"
            ],
            "additionalProperties": false
        }),
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

struct FileContext {
    path: String,
    content: String,
}

/// Iterative project analyzer. One instance per process; state lives in the
/// checkpoint store.
pub struct ProjectAnalyzer {
    llm: Arc<dyn LlmProvider>,
    checkpoints: Arc<CheckpointStore>,
    limiter: Arc<RateLimiter>,
}

impl ProjectAnalyzer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        checkpoints: Arc<CheckpointStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        ProjectAnalyzer { llm, checkpoints, limiter }
    }

    /// Run (or resume) the convergence loop for a project.
    pub async fn analyze(&self, root: &Path, force: bool) -> Result<ProjectAnalysis> {
        let root = root.canonicalize()?;
        let project = root.to_string_lossy().to_string();
        info!(project = project.as_str(), "Starting project analysis");

        if force {
            info!("Force reindex: clearing existing analysis");
            self.checkpoints.clear_analysis(&project)?;
        }

        let existing = self.checkpoints.load_analysis(&project)?;
        if let Some(state) = &existing {
            if state.completed {
                info!(min_confidence = state.min_confidence(), "Analysis already complete");
                return Ok(state.clone());
            }
        }

        let mut state =
            existing.unwrap_or_else(|| ProjectAnalysis::new(&project));
        let mut files_read: BTreeSet<String> = state.files_analyzed.clone();

        // Seed the queue: first-level files on a fresh run, the persisted
        // next_path suggestion when resuming
        let mut queue: Vec<String> = if state.iteration_count == 0 {
            let seed = collect_first_level(&root);
            info!(files = seed.len(), "First level collected");
            seed
        } else {
            info!(iteration = state.iteration_count, "Resuming analysis");
            self.checkpoints
                .last_iteration(&project)?
                .and_then(|snap| {
                    snap.snapshot
                        .get("next_path")
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                })
                .unwrap_or_default()
        };

        for iteration in state.iteration_count..MAX_ITERATIONS {
            info!(iteration = iteration + 1, max = MAX_ITERATIONS, "Analysis iteration");

            let mut batch = filter_unread(&root, &queue, &files_read);
            if batch.is_empty() {
                // Queue ran dry: accept anything at or above the ok
                // threshold, give up otherwise
                let min = state.min_confidence();
                if min >= STOP_OK {
                    info!(min_confidence = min, "No more files, marking complete");
                    state.completed = true;
                } else {
                    warn!(min_confidence = min, "No more files but confidence is low");
                }
                break;
            }
            batch.truncate(MAX_FILES_PER_ITERATION);

            let contexts = read_contents(&root, &batch);
            files_read.extend(batch.iter().cloned());

            let response = match self.call_with_validation(&root, &contexts, &state).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Analysis LLM call failed, aborting loop");
                    break;
                }
            };

            merge_response(&mut state, &response, &files_read, iteration + 1);
            queue = response.next_path.clone().unwrap_or_default();

            let snapshot = serde_json::json!({
                "state": serde_json::to_value(&state)?,
                "next_path": queue,
            });
            self.checkpoints.save_iteration(
                &project,
                iteration + 1,
                &batch,
                &contexts.iter().map(|c| c.path.clone()).collect::<Vec<_>>(),
                &snapshot,
            )?;
            self.checkpoints.save_analysis(&state)?;

            let min = state.min_confidence();
            if min >= STOP_HIGH && queue.is_empty() {
                info!(min_confidence = min, "Analysis converged");
                state.completed = true;
                break;
            }
            info!(min_confidence = min, "Continuing analysis");
        }

        // Final stop policy after the loop
        if !state.completed {
            let min = state.min_confidence();
            let avg = state.avg_confidence();
            if min >= STOP_OK {
                info!(min_confidence = min, "Accepting analysis at ok confidence");
                state.completed = true;
            } else if avg >= STOP_AVG {
                info!(avg_confidence = avg, min_confidence = min, "Accepting analysis on average confidence");
                state.completed = true;
            }
        }

        self.checkpoints.save_analysis(&state)?;
        info!(
            completed = state.completed,
            iterations = state.iteration_count,
            files = state.files_analyzed.len(),
            "Analysis finished"
        );
        Ok(state)
    }

    /// Call the LLM with the analysis schema, retrying schema violations up
    /// to `LLM_RETRIES` times. Transient provider failures retry inside the
    /// rate limiter and count against the logical call, not this loop.
    async fn call_with_validation(
        &self,
        root: &Path,
        contexts: &[FileContext],
        state: &ProjectAnalysis,
    ) -> Result<AnalysisResponse> {
        let prompt = build_prompt(root, contexts, state);
        let schema = response_schema();
        let messages = [
            ChatMessage::system(
                "You are a code analysis expert. Analyze project files and build understanding. Return JSON.",
            ),
            ChatMessage::user(prompt),
        ];

        let mut last_error = String::new();
        for attempt in 0..LLM_RETRIES {
            self.limiter.acquire(2000, 1).await;
            let response = self
                .limiter
                .execute_with_retry(|| async {
                    self.llm.chat_completion(&messages, Some(&schema), true).await
                })
                .await?;

            match extract_json(&response.content)
                .and_then(|v| serde_json::from_value::<AnalysisResponse>(v).map_err(Error::from))
            {
                Ok(parsed) => match parsed.validate() {
                    Ok(()) => return Ok(parsed),
                    Err(reason) => {
                        warn!(attempt = attempt + 1, reason = reason.as_str(), "Invalid analysis response");
                        last_error = reason;
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Unparseable analysis response");
                    last_error = e.to_string();
                }
            }
        }
        Err(Error::InvalidResponse(format!(
            "no valid analysis response after {LLM_RETRIES} attempts: {last_error}"
        )))
    }
}

// ---------------------------------------------------------------------------
// State merging
// ---------------------------------------------------------------------------

fn merge_response(
    state: &mut ProjectAnalysis,
    response: &AnalysisResponse,
    files_read: &BTreeSet<String>,
    iteration: u32,
) {
    let conf = |v: i64| v.clamp(0, 100) as u8;
    state
        .description
        .merge(response.project_description.clone(), conf(response.project_description_confidence));
    state.languages.merge(response.languages.clone(), conf(response.languages_confidence));
    state.frameworks.merge(response.frameworks.clone(), conf(response.frameworks_confidence));
    state.modules.merge(response.modules.clone(), conf(response.modules_confidence));
    state
        .entry_points
        .merge(response.entry_points.clone(), conf(response.entry_points_confidence));
    state.architecture.merge(response.architecture.clone(), conf(response.architecture_confidence));
    state.iteration_count = iteration;
    state.files_analyzed = files_read.clone();
}

// ---------------------------------------------------------------------------
// File selection
// ---------------------------------------------------------------------------

fn collect_first_level(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for name in FIRST_LEVEL_FILES {
        if root.join(name).is_file() {
            files.push(name.to_string());
        }
    }
    for dir in FIRST_LEVEL_DIRS {
        let dir_path = root.join(dir);
        if !dir_path.is_dir() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir_path) else {
            continue;
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(|n| n.to_string()))
            .filter(|n| !n.starts_with('.'))
            .map(|n| format!("{dir}/{n}"))
            .collect();
        names.sort();
        for name in names {
            if !files.contains(&name) {
                files.push(name);
            }
        }
    }
    files
}

/// Keep only unread, existing paths; suggested directories expand to their
/// first-level files.
fn filter_unread(root: &Path, paths: &[String], read: &BTreeSet<String>) -> Vec<String> {
    let mut valid = Vec::new();
    for path in paths {
        let clean = path.trim_end_matches('/');
        if read.contains(clean) {
            continue;
        }
        let full = root.join(clean);
        if full.is_file() {
            if !valid.contains(&clean.to_string()) {
                valid.push(clean.to_string());
            }
        } else if full.is_dir() {
            let Ok(entries) = std::fs::read_dir(&full) else {
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().to_str().map(|n| n.to_string()))
                .filter(|n| !n.starts_with('.'))
                .map(|n| format!("{clean}/{n}"))
                .collect();
            names.sort();
            for name in names {
                if !read.contains(&name) && !valid.contains(&name) {
                    valid.push(name);
                }
            }
        }
    }
    valid
}

fn read_contents(root: &Path, paths: &[String]) -> Vec<FileContext> {
    let mut contexts = Vec::new();
    for path in paths {
        match std::fs::read_to_string(root.join(path)) {
            Ok(mut content) => {
                if content.len() > MAX_CONTENT_BYTES {
                    let mut end = MAX_CONTENT_BYTES;
                    while !content.is_char_boundary(end) {
                        end -= 1;
                    }
                    content.truncate(end);
                    content.push_str("\n... [TRUNCATED]");
                }
                contexts.push(FileContext { path: path.clone(), content });
            }
            Err(e) => warn!(path = path.as_str(), error = %e, "Could not read file"),
        }
    }
    contexts
}

// ---------------------------------------------------------------------------
// Tree rendering and prompt
// ---------------------------------------------------------------------------

/// Bounded visual tree of the project: depth and per-directory item limits,
/// ignored directories pruned.
pub fn render_tree(root: &Path) -> String {
    fn walk(dir: &Path, prefix: &str, depth: usize, lines: &mut Vec<String>) {
        if depth >= MAX_TREE_DEPTH {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            lines.push(format!("{prefix}[unreadable]"));
            return;
        };
        let mut items: Vec<(bool, String, std::path::PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) {
                    return None;
                }
                Some((e.path().is_dir(), name, e.path()))
            })
            .collect();
        // Directories first, then lexicographic
        items.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let truncated = items.len() > MAX_TREE_ITEMS_PER_DIR;
        let shown = items.len().min(MAX_TREE_ITEMS_PER_DIR);
        for (i, (is_dir, name, path)) in items.into_iter().take(shown).enumerate() {
            let last = i + 1 == shown && !truncated;
            let connector = if last { "└── " } else { "├── " };
            let extension = if last { "    " } else { "│   " };
            if is_dir {
                lines.push(format!("{prefix}{connector}{name}/"));
                walk(&path, &format!("{prefix}{extension}"), depth + 1, lines);
            } else {
                lines.push(format!("{prefix}{connector}{name}"));
            }
        }
        if truncated {
            lines.push(format!("{prefix}└── ..."));
        }
    }

    let name = root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let mut lines = vec![format!("{name}/")];
    walk(root, "", 0, &mut lines);
    lines.join("\n")
}

fn build_prompt(root: &Path, contexts: &[FileContext], state: &ProjectAnalysis) -> String {
    let mut state_summary = String::new();
    if state.iteration_count > 0 {
        let list = |v: &Option<Vec<String>>| v.as_deref().unwrap_or_default().join(", ");
        state_summary = format!(
            "\nCURRENT UNDERSTANDING (after {} iterations):\n\
             - Description: {} (confidence: {}%)\n\
             - Languages: {} (confidence: {}%)\n\
             - Frameworks: {} (confidence: {}%)\n\
             - Modules: {} (confidence: {}%)\n\
             - Entry Points: {} (confidence: {}%)\n\
             - Architecture: {} (confidence: {}%)\n\
             - Files analyzed: {}\n",
            state.iteration_count,
            state.description.value.as_deref().unwrap_or("unknown"),
            state.description.confidence,
            list(&state.languages.value),
            state.languages.confidence,
            list(&state.frameworks.value),
            state.frameworks.confidence,
            list(&state.modules.value),
            state.modules.confidence,
            list(&state.entry_points.value),
            state.entry_points.confidence,
            state.architecture.value.as_deref().unwrap_or("unknown"),
            state.architecture.confidence,
            state.files_analyzed.len(),
        );
    }

    let mut files_section = String::new();
    for ctx in contexts {
        files_section.push_str(&format!("\n=== FILE: {} ===\n{}\n", ctx.path, ctx.content));
    }

    format!(
        "Analyze this software project to understand its structure and purpose.\n\n\
         PROJECT: {name}\nPATH: {path}\n\n\
         PROJECT STRUCTURE:\n{tree}\n\
         {state_summary}\n\
         NEW FILES TO ANALYZE:\n{files_section}\n\
         Based on ALL available information (current understanding + new files + project structure), provide:\n\n\
         1. **project_description**: What does this project do? (1-2 sentences)\n\
         2. **languages**: List of programming languages used\n\
         3. **frameworks**: List of frameworks/libraries used\n\
         4. **modules**: List of major modules/packages in the project\n\
         5. **entry_points**: List of main entry point files\n\
         6. **architecture**: Type of architecture (monolithic/microservices/library/cli/web-app/api/etc)\n\
         7. **next_path**: List of file/directory paths to analyze next (max 20)\n\
            - Use PROJECT STRUCTURE above to identify relevant files/directories\n\
            - You can specify directories (e.g., \"src/service/\") - all files inside will be read\n\
            - Focus on paths that would increase the LOWEST confidence scores\n\
         8. **reasoning**: Brief explanation of your analysis\n\n\
         For each field, also provide a confidence score (0-100):\n\
         - 0-30: Uncertain, need more information\n\
         - 31-60: Reasonable guess based on limited info\n\
         - 61-90: Fairly confident, have good evidence\n\
         - 91-100: Very confident, have strong evidence\n\n\
         If any field already has high confidence (>90%), you can keep the same value.\n\
         Always provide next_path suggestions unless ALL fields have 90%+ confidence.\n",
        name = root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        path = root.display(),
        tree = render_tree(root),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_first_level() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# proj\n").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("src/.hidden"), "x\n").unwrap();

        let files = collect_first_level(dir.path());
        assert!(files.contains(&"README.md".to_string()));
        assert!(files.contains(&"Cargo.toml".to_string()));
        assert!(files.contains(&"src/main.rs".to_string()));
        assert!(!files.iter().any(|f| f.contains(".hidden")));
        // README listed before directory entries
        assert_eq!(files[0], "README.md");
    }

    #[test]
    fn test_filter_unread_expands_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/api")).unwrap();
        std::fs::write(dir.path().join("src/api/users.py"), "x\n").unwrap();
        std::fs::write(dir.path().join("src/api/items.py"), "x\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "x\n").unwrap();

        let mut read = BTreeSet::new();
        read.insert("src/api/items.py".to_string());

        let queue = vec!["src/api/".to_string(), "main.py".to_string(), "ghost.py".to_string()];
        let valid = filter_unread(dir.path(), &queue, &read);
        assert_eq!(valid, vec!["src/api/users.py".to_string(), "main.py".to_string()]);
    }

    #[test]
    fn test_render_tree_bounded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/a/b/c/d/e")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/junk")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "x\n").unwrap();

        let tree = render_tree(dir.path());
        assert!(tree.contains("src/"));
        assert!(tree.contains("lib.rs"));
        assert!(!tree.contains("node_modules"));
        // Depth bound: e/ is five levels down and must not appear
        assert!(!tree.contains("e/"));
    }

    #[test]
    fn test_response_validation() {
        let ok = AnalysisResponse {
            project_description: Some("d".into()),
            project_description_confidence: 50,
            languages: None,
            languages_confidence: 0,
            frameworks: None,
            frameworks_confidence: 100,
            modules: None,
            modules_confidence: 10,
            entry_points: None,
            entry_points_confidence: 20,
            architecture: None,
            architecture_confidence: 30,
            next_path: None,
            reasoning: String::new(),
        };
        assert!(ok.validate().is_ok());

        let bad = AnalysisResponse { languages_confidence: 150, ..ok };
        assert!(bad.validate().is_err());

        let negative = AnalysisResponse { modules_confidence: -5, ..bad };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_merge_monotone_across_iterations() {
        let mut state = ProjectAnalysis::new("/p");
        let read: BTreeSet<String> = ["README.md".to_string()].into();

        let first = AnalysisResponse {
            project_description: Some("web service".into()),
            project_description_confidence: 80,
            languages: Some(vec!["Python".into()]),
            languages_confidence: 90,
            frameworks: Some(vec!["FastAPI".into()]),
            frameworks_confidence: 85,
            modules: None,
            modules_confidence: 0,
            entry_points: None,
            entry_points_confidence: 0,
            architecture: Some("api".into()),
            architecture_confidence: 60,
            next_path: None,
            reasoning: String::new(),
        };
        merge_response(&mut state, &first, &read, 1);
        assert_eq!(state.languages.confidence, 90);

        // A weaker second response never regresses confidences
        let second = AnalysisResponse {
            project_description: Some("something else".into()),
            project_description_confidence: 40,
            languages: Some(vec!["Ruby".into()]),
            languages_confidence: 30,
            frameworks: None,
            frameworks_confidence: 0,
            modules: Some(vec!["core".into()]),
            modules_confidence: 55,
            entry_points: None,
            entry_points_confidence: 0,
            architecture: None,
            architecture_confidence: 0,
            next_path: None,
            reasoning: String::new(),
        };
        merge_response(&mut state, &second, &read, 2);

        assert_eq!(state.languages.value.as_deref(), Some(["Python".to_string()].as_slice()));
        assert_eq!(state.languages.confidence, 90);
        assert_eq!(state.description.confidence, 80);
        assert_eq!(state.modules.confidence, 55);
        assert_eq!(state.iteration_count, 2);
    }
}
