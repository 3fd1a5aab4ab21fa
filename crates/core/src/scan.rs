use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::FilePatterns;
use crate::error::{Error, Result};
use crate::types::{FileKind, FileRecord, Language};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Extensions that are always binary, regardless of glob matches.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "pdf", "zip", "tar", "gz", "ico", "woff",
    "woff2", "ttf", "eot", "pyc", "so", "dll", "exe", "bin", "dat",
];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a file as code, test, documentation, or config from its path.
pub fn classify_file(rel_path: &str) -> FileKind {
    let lower = rel_path.to_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    let ext = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    if ["readme", "contributing", "changelog", "license"].iter().any(|d| file_name.starts_with(d))
        || lower.starts_with("docs/")
        || lower.contains("/docs/")
        || matches!(ext, "md" | "rst" | "txt")
    {
        return FileKind::Documentation;
    }

    if file_name.contains("config")
        || file_name.contains("settings")
        || file_name.starts_with(".env")
        || file_name.starts_with("dockerfile")
        || matches!(ext, "json" | "yaml" | "yml" | "toml" | "ini" | "conf" | "xml")
    {
        return FileKind::Config;
    }

    if lower.contains("test") || lower.contains("spec") || lower.contains("__test__") {
        return FileKind::Test;
    }

    FileKind::Code
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| Error::Config(format!("glob set: {e}")))
}

/// Streaming SHA-256 of a file's content (8 KiB reads).
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Walk `root` and return the files eligible for indexing.
///
/// Rules applied in order: VCS-ignore excludes, exclude globs, include
/// globs, size limits, binary-extension filter. Unreadable entries are
/// logged and skipped.
pub fn scan_project(root: &Path, patterns: &FilePatterns) -> Result<Vec<FileRecord>> {
    let include = build_globset(&patterns.include)?;
    let exclude = build_globset(&patterns.exclude)?;

    let mut candidates: Vec<(std::path::PathBuf, String, u64, f64)> = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let abs_path = entry.path().to_path_buf();
        let rel_path = abs_path
            .strip_prefix(root)
            .unwrap_or(&abs_path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude.is_match(&rel_path) {
            continue;
        }
        if !include.is_match(&rel_path) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = rel_path.as_str(), error = %e, "Skipping file without metadata");
                continue;
            }
        };
        let size = meta.len();
        if size == 0 || size > patterns.max_file_size_bytes {
            debug!(path = rel_path.as_str(), size, "Skipping by size");
            continue;
        }

        let ext = rel_path.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        candidates.push((abs_path, rel_path, size, modified));
    }

    // Hash in parallel; unreadable files drop out here too
    let mut records: Vec<FileRecord> = candidates
        .into_par_iter()
        .filter_map(|(abs_path, rel_path, size, modified)| {
            let hash = match hash_file(&abs_path) {
                Ok(h) => h,
                Err(e) => {
                    warn!(path = rel_path.as_str(), error = %e, "Failed to hash file, skipping");
                    return None;
                }
            };
            let ext = rel_path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
            Some(FileRecord {
                language: Language::from_ext(ext),
                kind: classify_file(&rel_path),
                abs_path,
                rel_path,
                size,
                modified,
                hash,
            })
        })
        .collect();

    records.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    info!(root = %root.display(), files = records.len(), "Scan complete");
    Ok(records)
}

/// Build a [`FileRecord`] for a single known path (used by targeted updates).
pub fn scan_single_file(root: &Path, rel_path: &str) -> Result<FileRecord> {
    let abs_path = root.join(rel_path);
    let meta = fs::metadata(&abs_path)?;
    let hash = hash_file(&abs_path)?;
    let ext = rel_path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    Ok(FileRecord {
        language: Language::from_ext(ext),
        kind: classify_file(rel_path),
        abs_path,
        rel_path: rel_path.to_string(),
        size: meta.len(),
        modified: meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
        hash,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
