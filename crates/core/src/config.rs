//! Runtime configuration: every knob the pipeline reads, grouped per
//! component, loaded from environment variables with an optional
//! `.codeatlas.toml` override for file patterns.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Include/exclude globs and size limits for the file scanner.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for FilePatterns {
    fn default() -> Self {
        FilePatterns {
            include: [
                "**/*.py", "**/*.js", "**/*.ts", "**/*.tsx", "**/*.jsx",
                "**/*.java", "**/*.kt", "**/*.go", "**/*.rs", "**/*.rb",
                "**/*.c", "**/*.cpp", "**/*.h", "**/*.hpp",
                "**/*.md", "**/*.yaml", "**/*.yml", "**/*.json", "**/*.toml",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude: [
                "**/node_modules/**", "**/venv/**", "**/.venv/**", "**/env/**",
                "**/__pycache__/**", "**/.git/**", "**/dist/**", "**/build/**",
                "**/target/**", "**/*.min.js", "**/*.min.css", "**/.next/**",
                "**/coverage/**", "**/*.lock", "**/package-lock.json",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_file_size_bytes: 1024 * 1024,
        }
    }
}

/// Chunking and concurrency limits for the index engines.
#[derive(Debug, Clone)]
pub struct IndexingLimits {
    pub max_chunk_tokens: usize,
    pub chunk_overlap_tokens: usize,
    /// Outer bound: file pipelines in flight at once.
    pub max_concurrent_files: usize,
    /// Inner bound: function analyses in flight per file.
    pub max_concurrent_functions: usize,
}

impl Default for IndexingLimits {
    fn default() -> Self {
        IndexingLimits {
            max_chunk_tokens: 6000,
            chunk_overlap_tokens: 500,
            max_concurrent_files: 5,
            max_concurrent_functions: 8,
        }
    }
}

/// Rate-limit and retry knobs applied to every external call.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        RateLimits {
            requests_per_minute: 3500,
            tokens_per_minute: 1_000_000,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Provider endpoints and models for LLM analysis and embeddings.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub llm_model: String,
    pub llm_api_key: String,
    /// Override for OpenAI-compatible endpoints (local inference servers).
    pub llm_base_url: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub embedding_dimension: usize,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete configuration fan-in. No component reads the environment
/// directly; everything flows through this struct.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the checkpoint database and vector collections.
    pub storage_root: PathBuf,
    pub patterns: FilePatterns,
    pub indexing: IndexingLimits,
    pub rate: RateLimits,
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_root: PathBuf::from(".codeatlas"),
            patterns: FilePatterns::default(),
            indexing: IndexingLimits::default(),
            rate: RateLimits::default(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Shape of the optional `.codeatlas.toml` patterns file.
#[derive(Debug, Deserialize, Default)]
struct PatternsFile {
    #[serde(default)]
    include_patterns: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

impl Config {
    /// Build configuration from environment variables, then overlay file
    /// patterns from `.codeatlas.toml` if present in the current directory.
    pub fn from_env() -> Result<Config> {
        let mut config = Config {
            storage_root: env_path("CODEATLAS_STORAGE_ROOT", ".codeatlas"),
            ..Config::default()
        };

        if let Some(mb) = env_parse::<f64>("MAX_FILE_SIZE_MB")? {
            config.patterns.max_file_size_bytes = (mb * 1024.0 * 1024.0) as u64;
        }
        if let Some(v) = env_parse("MAX_CHUNK_TOKENS")? {
            config.indexing.max_chunk_tokens = v;
        }
        if let Some(v) = env_parse("CHUNK_OVERLAP_TOKENS")? {
            config.indexing.chunk_overlap_tokens = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_FILES")? {
            config.indexing.max_concurrent_files = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_FUNCTIONS")? {
            config.indexing.max_concurrent_functions = v;
        }
        if let Some(v) = env_parse("RATE_LIMIT_RPM")? {
            config.rate.requests_per_minute = v;
        }
        if let Some(v) = env_parse("RATE_LIMIT_TPM")? {
            config.rate.tokens_per_minute = v;
        }
        if let Some(v) = env_parse("PROVIDER_MAX_RETRIES")? {
            config.rate.max_retries = v;
        }
        if let Some(secs) = env_parse::<u64>("PROVIDER_TIMEOUT")? {
            config.rate.request_timeout = Duration::from_secs(secs);
        }

        let api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        config.provider = ProviderConfig {
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_api_key: api_key.clone(),
            llm_base_url: env::var("LLM_BASE_URL").ok(),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or(api_key),
            embedding_base_url: env::var("EMBEDDING_BASE_URL").ok(),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION")?.unwrap_or(1536),
        };

        config.load_patterns_file(Path::new(".codeatlas.toml"))?;
        Ok(config)
    }

    /// Overlay include/exclude patterns from a TOML file, if it exists.
    pub fn load_patterns_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(path)?;
        let parsed: PatternsFile = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if !parsed.include_patterns.is_empty() {
            self.patterns.include = parsed.include_patterns;
        }
        if !parsed.exclude_patterns.is_empty() {
            self.patterns.exclude = parsed.exclude_patterns;
        }
        Ok(())
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.indexing.max_chunk_tokens, 6000);
        assert_eq!(c.indexing.chunk_overlap_tokens, 500);
        assert_eq!(c.rate.requests_per_minute, 3500);
        assert!(c.patterns.include.iter().any(|p| p == "**/*.py"));
        assert!(c.patterns.exclude.iter().any(|p| p.contains("node_modules")));
    }

    #[test]
    fn test_patterns_file_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".codeatlas.toml");
        std::fs::write(&path, "include_patterns = [\"**/*.zig\"]\n").unwrap();

        let mut c = Config::default();
        c.load_patterns_file(&path).unwrap();
        assert_eq!(c.patterns.include, vec!["**/*.zig".to_string()]);
        // Exclude untouched when the file omits it
        assert!(!c.patterns.exclude.is_empty());
    }
}
