//! Durable checkpoint store backing all three indexes.
//!
//! A single SQLite database under the storage root with four tables:
//! `pa_state` and `pa_iterations` for the project analysis, `fi_files` and
//! `fui_files` for the per-file progress of the file and function indexes.
//! Every put commits before returning, so a completed checkpoint row always
//! means the corresponding work unit finished.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::types::ProjectAnalysis;

// ---------------------------------------------------------------------------
// Index kinds
// ---------------------------------------------------------------------------

/// Which per-file checkpoint table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Files,
    Functions,
}

impl IndexKind {
    fn table(&self) -> &'static str {
        match self {
            IndexKind::Files => "fi_files",
            IndexKind::Functions => "fui_files",
        }
    }

    fn artifact_column(&self) -> &'static str {
        match self {
            IndexKind::Files => "chunks_count",
            IndexKind::Functions => "functions_count",
        }
    }
}

/// Aggregate statistics over one per-file checkpoint table.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of chunks (files index) or functions (functions index).
    pub artifacts: usize,
}

/// One persisted analysis-iteration snapshot.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    pub iteration: u32,
    pub files_requested: Vec<String>,
    pub files_read: Vec<String>,
    pub snapshot: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed checkpoint store. All operations are idempotent; concurrent
/// puts from worker tasks serialize on the connection lock.
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint database under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("checkpoints.db");
        let conn = Connection::open(&db_path)?;
        let store = CheckpointStore { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %db_path.display(), "Checkpoint database ready");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let store = CheckpointStore { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pa_state (
                project_path TEXT PRIMARY KEY,
                state        TEXT NOT NULL,
                updated_at   TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS pa_iterations (
                project_path    TEXT NOT NULL,
                iteration       INTEGER NOT NULL,
                files_requested TEXT,
                files_read      TEXT,
                snapshot        TEXT,
                created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(project_path, iteration)
            );
            CREATE TABLE IF NOT EXISTS fi_files (
                project_path  TEXT NOT NULL,
                file_path     TEXT NOT NULL,
                file_hash     TEXT NOT NULL,
                chunks_count  INTEGER DEFAULT 0,
                status        TEXT NOT NULL,
                error_message TEXT,
                created_at    TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(project_path, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_fi_project ON fi_files(project_path);
            CREATE INDEX IF NOT EXISTS idx_fi_status  ON fi_files(project_path, status);
            CREATE TABLE IF NOT EXISTS fui_files (
                project_path    TEXT NOT NULL,
                file_path       TEXT NOT NULL,
                file_hash       TEXT NOT NULL,
                functions_count INTEGER DEFAULT 0,
                status          TEXT NOT NULL,
                error_message   TEXT,
                created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(project_path, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_fui_project ON fui_files(project_path);
            CREATE INDEX IF NOT EXISTS idx_fui_status  ON fui_files(project_path, status);",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Project analysis state
    // -----------------------------------------------------------------------

    /// Persist the full analysis record (upsert by project path).
    pub fn save_analysis(&self, analysis: &ProjectAnalysis) -> Result<()> {
        let state = serde_json::to_string(analysis)?;
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute(
            "INSERT INTO pa_state (project_path, state, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(project_path) DO UPDATE SET
                state = excluded.state, updated_at = CURRENT_TIMESTAMP",
            params![analysis.project_path, state],
        )?;
        Ok(())
    }

    pub fn load_analysis(&self, project_path: &str) -> Result<Option<ProjectAnalysis>> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM pa_state WHERE project_path = ?1",
                params![project_path],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Record one analysis-iteration snapshot (upsert by iteration number).
    pub fn save_iteration(
        &self,
        project_path: &str,
        iteration: u32,
        files_requested: &[String],
        files_read: &[String],
        snapshot: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute(
            "INSERT INTO pa_iterations (project_path, iteration, files_requested, files_read, snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_path, iteration) DO UPDATE SET
                files_requested = excluded.files_requested,
                files_read = excluded.files_read,
                snapshot = excluded.snapshot",
            params![
                project_path,
                iteration,
                serde_json::to_string(files_requested)?,
                serde_json::to_string(files_read)?,
                snapshot.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Most recent iteration snapshot for a project.
    pub fn last_iteration(&self, project_path: &str) -> Result<Option<IterationSnapshot>> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        let row = conn
            .query_row(
                "SELECT iteration, files_requested, files_read, snapshot
                 FROM pa_iterations WHERE project_path = ?1
                 ORDER BY iteration DESC LIMIT 1",
                params![project_path],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((iteration, requested, read, snapshot)) = row else {
            return Ok(None);
        };
        let parse_list = |raw: Option<String>| -> Vec<String> {
            raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
        };
        Ok(Some(IterationSnapshot {
            iteration,
            files_requested: parse_list(requested),
            files_read: parse_list(read),
            snapshot: snapshot
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
        }))
    }

    pub fn clear_analysis(&self, project_path: &str) -> Result<()> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute("DELETE FROM pa_state WHERE project_path = ?1", params![project_path])?;
        conn.execute("DELETE FROM pa_iterations WHERE project_path = ?1", params![project_path])?;
        info!(project = project_path, "Cleared project analysis checkpoints");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-file checkpoints (file + function indexes)
    // -----------------------------------------------------------------------

    /// Record a file as completed (no error) or failed (error present) under
    /// the given index kind, together with its content hash and the number
    /// of artifacts produced.
    pub fn mark_file(
        &self,
        kind: IndexKind,
        project_path: &str,
        file_path: &str,
        file_hash: &str,
        artifact_count: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let status = if error.is_some() { "failed" } else { "completed" };
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (project_path, file_path, file_hash, {}, status, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                kind.table(),
                kind.artifact_column(),
            ),
            params![project_path, file_path, file_hash, artifact_count, status, error],
        )?;
        Ok(())
    }

    /// Reindex decision: absent row, failed row, or changed hash all force
    /// reprocessing; a completed row with a matching hash suppresses it.
    pub fn should_reindex(
        &self,
        kind: IndexKind,
        project_path: &str,
        file_path: &str,
        current_hash: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        let row: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT status, file_hash FROM {} WHERE project_path = ?1 AND file_path = ?2",
                    kind.table()
                ),
                params![project_path, file_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            None => true,
            Some((status, _)) if status == "failed" => true,
            Some((_, hash)) if hash != current_hash => true,
            _ => false,
        })
    }

    /// Remove the checkpoint rows for specific files, forcing reprocessing
    /// on the next run.
    pub fn clear_file_rows(
        &self,
        kind: IndexKind,
        project_path: &str,
        file_paths: &[String],
    ) -> Result<()> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        for path in file_paths {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE project_path = ?1 AND file_path = ?2",
                    kind.table()
                ),
                params![project_path, path],
            )?;
        }
        Ok(())
    }

    /// Drop every row of one index kind for a project.
    pub fn clear_kind(&self, kind: IndexKind, project_path: &str) -> Result<()> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        conn.execute(
            &format!("DELETE FROM {} WHERE project_path = ?1", kind.table()),
            params![project_path],
        )?;
        info!(project = project_path, table = kind.table(), "Cleared index checkpoints");
        Ok(())
    }

    /// Aggregate stats for one index kind.
    pub fn stats(&self, kind: IndexKind, project_path: &str) -> Result<IndexStats> {
        let conn = self.conn.lock().expect("checkpoint lock poisoned");
        let stats = conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM({}), 0)
                 FROM {} WHERE project_path = ?1",
                kind.artifact_column(),
                kind.table(),
            ),
            params![project_path],
            |row| {
                Ok(IndexStats {
                    total: row.get::<_, i64>(0)? as usize,
                    completed: row.get::<_, i64>(1)? as usize,
                    failed: row.get::<_, i64>(2)? as usize,
                    artifacts: row.get::<_, i64>(3)? as usize,
                })
            },
        )?;
        Ok(stats)
    }

    /// Drop everything recorded for a project across all tables.
    pub fn clear_project(&self, project_path: &str) -> Result<()> {
        self.clear_analysis(project_path)?;
        self.clear_kind(IndexKind::Files, project_path)?;
        self.clear_kind(IndexKind::Functions, project_path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_roundtrip() {
        let store = CheckpointStore::in_memory().unwrap();
        let mut analysis = ProjectAnalysis::new("/tmp/project");
        analysis.description.merge(Some("a web service".into()), 75);
        analysis.iteration_count = 2;
        analysis.files_analyzed.insert("README.md".into());

        store.save_analysis(&analysis).unwrap();
        let loaded = store.load_analysis("/tmp/project").unwrap().unwrap();
        assert_eq!(loaded.description.value.as_deref(), Some("a web service"));
        assert_eq!(loaded.description.confidence, 75);
        assert_eq!(loaded.iteration_count, 2);
        assert!(loaded.files_analyzed.contains("README.md"));

        assert!(store.load_analysis("/other").unwrap().is_none());
    }

    #[test]
    fn test_should_reindex_transitions() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";

        // Absent row
        assert!(store.should_reindex(IndexKind::Files, p, "a.py", "h1").unwrap());

        // Completed with same hash
        store.mark_file(IndexKind::Files, p, "a.py", "h1", 3, None).unwrap();
        assert!(!store.should_reindex(IndexKind::Files, p, "a.py", "h1").unwrap());

        // Hash changed
        assert!(store.should_reindex(IndexKind::Files, p, "a.py", "h2").unwrap());

        // Failed row retries even with same hash
        store.mark_file(IndexKind::Files, p, "a.py", "h1", 0, Some("boom")).unwrap();
        assert!(store.should_reindex(IndexKind::Files, p, "a.py", "h1").unwrap());
    }

    #[test]
    fn test_kinds_are_independent() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";
        store.mark_file(IndexKind::Files, p, "a.py", "h1", 2, None).unwrap();

        assert!(!store.should_reindex(IndexKind::Files, p, "a.py", "h1").unwrap());
        assert!(store.should_reindex(IndexKind::Functions, p, "a.py", "h1").unwrap());
    }

    #[test]
    fn test_stats_aggregation() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";
        store.mark_file(IndexKind::Files, p, "a.py", "h1", 2, None).unwrap();
        store.mark_file(IndexKind::Files, p, "b.py", "h2", 5, None).unwrap();
        store.mark_file(IndexKind::Files, p, "c.py", "h3", 0, Some("io error")).unwrap();

        let stats = store.stats(IndexKind::Files, p).unwrap();
        assert_eq!(stats, IndexStats { total: 3, completed: 2, failed: 1, artifacts: 7 });

        // Other projects invisible
        let empty = store.stats(IndexKind::Files, "/elsewhere").unwrap();
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn test_mark_file_idempotent() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";
        store.mark_file(IndexKind::Functions, p, "a.py", "h1", 4, None).unwrap();
        store.mark_file(IndexKind::Functions, p, "a.py", "h1", 4, None).unwrap();

        let stats = store.stats(IndexKind::Functions, p).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.artifacts, 4);
    }

    #[test]
    fn test_iteration_snapshots() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";
        store
            .save_iteration(p, 1, &["README.md".into()], &["README.md".into()], &serde_json::json!({"next_path": ["src/"]}))
            .unwrap();
        store
            .save_iteration(p, 2, &["src/main.py".into()], &[], &serde_json::json!({"next_path": []}))
            .unwrap();

        let last = store.last_iteration(p).unwrap().unwrap();
        assert_eq!(last.iteration, 2);
        assert_eq!(last.files_requested, vec!["src/main.py".to_string()]);

        store.clear_analysis(p).unwrap();
        assert!(store.last_iteration(p).unwrap().is_none());
    }

    #[test]
    fn test_clear_file_rows() {
        let store = CheckpointStore::in_memory().unwrap();
        let p = "/tmp/project";
        store.mark_file(IndexKind::Files, p, "a.py", "h1", 1, None).unwrap();
        store.mark_file(IndexKind::Files, p, "b.py", "h2", 1, None).unwrap();

        store.clear_file_rows(IndexKind::Files, p, &["a.py".into()]).unwrap();
        assert!(store.should_reindex(IndexKind::Files, p, "a.py", "h1").unwrap());
        assert!(!store.should_reindex(IndexKind::Files, p, "b.py", "h2").unwrap());
    }
}
