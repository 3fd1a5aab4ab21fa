use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Languages and file classification
// ---------------------------------------------------------------------------

/// Programming language of a scanned file, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Kotlin,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Swift,
    Scala,
    Markdown,
    Yaml,
    Json,
    Toml,
    Unknown,
}

impl Language {
    /// Detect language from a file extension (without the leading dot).
    pub fn from_ext(ext: &str) -> Language {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "kt" | "kts" => Language::Kotlin,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "scala" => Language::Scala,
            "md" | "rst" => Language::Markdown,
            "yaml" | "yml" => Language::Yaml,
            "json" => Language::Json,
            "toml" => Language::Toml,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Kotlin => "kotlin",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Scala => "scala",
            Language::Markdown => "markdown",
            Language::Yaml => "yaml",
            Language::Json => "json",
            Language::Toml => "toml",
            Language::Unknown => "unknown",
        }
    }

    /// Whether files in this language carry executable source code
    /// (as opposed to docs, data, and config formats).
    pub fn is_source(&self) -> bool {
        !matches!(
            self,
            Language::Markdown
                | Language::Yaml
                | Language::Json
                | Language::Toml
                | Language::Unknown
        )
    }
}

/// Coarse classification of a scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Code,
    Test,
    Documentation,
    Config,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Code => "code",
            FileKind::Test => "test",
            FileKind::Documentation => "documentation",
            FileKind::Config => "config",
        }
    }
}

/// Metadata for a file discovered during the directory scan.
///
/// File records are ephemeral, rebuilt on every scan. The `hash` field is
/// the SHA-256 of the content and is the sole input to reindex decisions.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub language: Language,
    pub kind: FileKind,
    pub size: u64,
    /// Modification time as seconds since the epoch.
    pub modified: f64,
    /// SHA-256 hex digest of the file content.
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// A token-bounded sub-range of a file, with 1-based inclusive line bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub total: usize,
    pub start_line: usize,
    pub end_line: usize,
}

// ---------------------------------------------------------------------------
// Project analysis
// ---------------------------------------------------------------------------

/// A single analysis field paired with a confidence score in [0, 100].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisField<T> {
    pub value: Option<T>,
    pub confidence: u8,
}

impl<T> AnalysisField<T> {
    /// Merge an incoming value: replaces the stored value when the new
    /// confidence is strictly higher or nothing is stored yet.
    pub fn merge(&mut self, value: Option<T>, confidence: u8) {
        if confidence > self.confidence || self.value.is_none() {
            self.value = value;
            self.confidence = confidence.min(100);
        }
    }
}

/// Durable, monotonically-refined understanding of a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub project_path: String,
    pub description: AnalysisField<String>,
    pub languages: AnalysisField<Vec<String>>,
    pub frameworks: AnalysisField<Vec<String>>,
    pub modules: AnalysisField<Vec<String>>,
    pub entry_points: AnalysisField<Vec<String>>,
    pub architecture: AnalysisField<String>,
    pub iteration_count: u32,
    pub files_analyzed: BTreeSet<String>,
    pub completed: bool,
}

impl ProjectAnalysis {
    pub fn new(project_path: &str) -> Self {
        ProjectAnalysis { project_path: project_path.to_string(), ..Default::default() }
    }

    fn confidences(&self) -> [u8; 6] {
        [
            self.description.confidence,
            self.languages.confidence,
            self.frameworks.confidence,
            self.modules.confidence,
            self.entry_points.confidence,
            self.architecture.confidence,
        ]
    }

    /// Lowest confidence across the six analysis fields.
    pub fn min_confidence(&self) -> u8 {
        self.confidences().into_iter().min().unwrap_or(0)
    }

    /// Average confidence across the six analysis fields.
    pub fn avg_confidence(&self) -> u8 {
        let c = self.confidences();
        (c.iter().map(|&v| v as u32).sum::<u32>() / c.len() as u32) as u8
    }

    /// Whether downstream indexes may build on this analysis.
    pub fn is_sufficient(&self, min_confidence: u8) -> bool {
        self.completed || self.min_confidence() >= min_confidence
    }

    /// Project name derived from the last path component.
    pub fn project_name(&self) -> &str {
        self.project_path.rsplit(['/', '\\']).next().unwrap_or(&self.project_path)
    }

    /// Render the analysis as the text of the project-context document.
    pub fn context_text(&self) -> String {
        let join = |v: &Option<Vec<String>>| v.as_deref().unwrap_or_default().join(", ");
        format!(
            "Project: {}\nDescription: {}\nLanguages: {}\nFrameworks: {}\nModules: {}\nEntry Points: {}\nArchitecture: {}",
            self.project_name(),
            self.description.value.as_deref().unwrap_or(""),
            join(&self.languages.value),
            join(&self.frameworks.value),
            join(&self.modules.value),
            join(&self.entry_points.value),
            self.architecture.value.as_deref().unwrap_or(""),
        )
    }
}

// ---------------------------------------------------------------------------
// Function records and call edges (AST layer output)
// ---------------------------------------------------------------------------

/// A function definition extracted from source via tree-sitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub rel_path: String,
    /// 1-based start line of the definition.
    pub line_start: usize,
    /// 1-based end line (inclusive).
    pub line_end: usize,
    /// Complete source of the function, decorators included.
    pub source: String,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub is_method: bool,
    pub class_name: Option<String>,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
}

impl FunctionRecord {
    /// Stable identity of a definition site within a project.
    pub fn def_id(&self) -> String {
        format!("{}::{}::{}", self.rel_path, self.name, self.line_start)
    }
}

/// A call expression observed inside a function body. Unresolved until the
/// resolver pass promotes `callee_name` to a definition site.
#[derive(Debug, Clone)]
pub struct CallEdge {
    /// Name of the enclosing function making the call.
    pub caller: String,
    pub callee_name: String,
    /// Receiver / module prefix when the callee expression was qualified.
    pub callee_module: Option<String>,
    pub line: usize,
    pub arguments: Vec<String>,
}

/// An import statement. Empty `names` means the whole module (or a wildcard).
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub module: String,
    pub names: Vec<String>,
    pub alias: Option<String>,
}

// ---------------------------------------------------------------------------
// Triggers and layers
// ---------------------------------------------------------------------------

/// The kind of external trigger that makes a function an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Http,
    Grpc,
    Kafka,
    Scheduled,
    Websocket,
    Graphql,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Http => "http",
            TriggerKind::Grpc => "grpc",
            TriggerKind::Kafka => "kafka",
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Websocket => "websocket",
            TriggerKind::Graphql => "graphql",
        }
    }
}

/// A detected entry point with kind-specific metadata
/// (HTTP: method + path; gRPC: service + method; Kafka: topic; ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub function_name: String,
    pub kind: TriggerKind,
    pub metadata: std::collections::BTreeMap<String, String>,
}

/// Architectural layer assigned to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Trigger,
    Controller,
    Service,
    Provider,
    External,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Trigger => "trigger",
            Layer::Controller => "controller",
            Layer::Service => "service",
            Layer::Provider => "provider",
            Layer::External => "external",
        }
    }
}

// ---------------------------------------------------------------------------
// Operation reports
// ---------------------------------------------------------------------------

/// Outcome class of an indexing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    /// All units succeeded (or there was nothing to do).
    Success,
    /// At least one unit succeeded and at least one failed.
    Partial,
    /// Nothing progressed.
    Failed,
}

/// Result summary for a file-index run.
#[derive(Debug, Clone, Serialize)]
pub struct FileIndexReport {
    pub status: OpStatus,
    pub total_files: usize,
    pub indexed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub resumed: bool,
    pub total_chunks: usize,
    pub duration_ms: u64,
    /// First few per-unit error messages.
    pub errors: Vec<String>,
}

/// Result summary for a function-index run.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionIndexReport {
    pub status: OpStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub resumed: bool,
    pub total_functions: usize,
    pub indexed_functions: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// Bounded number of per-unit errors carried in a report.
pub const MAX_REPORTED_ERRORS: usize = 10;

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

/// First 12 hex chars of the SHA-256 of the canonicalized project path.
/// Scopes collection names and document ids to a project.
pub fn project_hash12(project_path: &Path) -> String {
    let canonical = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex_prefix(&digest, 12)
}

/// Stable 8-hex-char hash of a function identity `(file, name, line_start)`.
pub fn function_hash8(rel_path: &str, name: &str, line_start: usize) -> String {
    let digest = Sha256::digest(format!("{rel_path}:{name}:{line_start}").as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_ext("py"), Language::Python);
        assert_eq!(Language::from_ext("tsx"), Language::TypeScript);
        assert_eq!(Language::from_ext("kt"), Language::Kotlin);
        assert_eq!(Language::from_ext("weird"), Language::Unknown);
        assert!(Language::Python.is_source());
        assert!(!Language::Markdown.is_source());
    }

    #[test]
    fn test_field_merge_monotone() {
        let mut field: AnalysisField<String> = AnalysisField::default();

        field.merge(Some("guess".into()), 40);
        assert_eq!(field.value.as_deref(), Some("guess"));
        assert_eq!(field.confidence, 40);

        // Lower confidence never regresses a present value
        field.merge(Some("worse".into()), 30);
        assert_eq!(field.value.as_deref(), Some("guess"));
        assert_eq!(field.confidence, 40);

        // Higher confidence replaces
        field.merge(Some("better".into()), 85);
        assert_eq!(field.value.as_deref(), Some("better"));
        assert_eq!(field.confidence, 85);

        // A higher-confidence update replaces even with an absent value
        field.merge(None, 95);
        assert!(field.value.is_none());
        assert_eq!(field.confidence, 95);
    }

    #[test]
    fn test_min_avg_confidence() {
        let mut a = ProjectAnalysis::new("/tmp/p");
        a.description.merge(Some("desc".into()), 90);
        a.languages.merge(Some(vec!["python".into()]), 80);
        a.frameworks.merge(Some(vec![]), 70);
        a.modules.merge(Some(vec![]), 60);
        a.entry_points.merge(Some(vec![]), 50);
        a.architecture.merge(Some("cli".into()), 40);

        assert_eq!(a.min_confidence(), 40);
        assert_eq!(a.avg_confidence(), 65);
        assert!(a.is_sufficient(40));
        assert!(!a.is_sufficient(70));
    }

    #[test]
    fn test_stable_hashes() {
        let a = function_hash8("src/a.py", "f", 10);
        let b = function_hash8("src/a.py", "f", 10);
        let c = function_hash8("src/a.py", "f", 11);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);

        let p = project_hash12(Path::new("/definitely/not/a/real/path"));
        assert_eq!(p.len(), 12);
    }
}
