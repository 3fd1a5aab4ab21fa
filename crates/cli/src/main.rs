//! CodeAtlas CLI — analyze, index, and search repositories from the
//! terminal. Thin shell over the [`codeatlas_core`] library.
//!
//! Exit codes: 0 on success, 2 when a prerequisite index is missing,
//! 1 on unexpected failure.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::error;

use codeatlas_core::{Indexer, OpStatus};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Semantic code index: project analysis, file and function search.
#[derive(Parser)]
#[command(name = "codeatlas", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchKind {
    Files,
    Functions,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the iterative project analysis
    Analyze {
        /// Project root directory
        path: PathBuf,

        /// Discard the stored analysis and start fresh
        #[arg(long)]
        force: bool,
    },
    /// Build the file index (requires a completed analysis)
    IndexFiles {
        /// Project root directory
        path: PathBuf,

        /// Reindex every file, ignoring checkpoints
        #[arg(long)]
        force: bool,

        /// Additional include glob (repeatable)
        #[arg(long = "include", value_name = "GLOB")]
        include: Vec<String>,

        /// Additional exclude glob (repeatable)
        #[arg(long = "exclude", value_name = "GLOB")]
        exclude: Vec<String>,
    },
    /// Build the function index (requires the file index)
    IndexFunctions {
        /// Project root directory
        path: PathBuf,

        /// Reindex every file, ignoring checkpoints
        #[arg(long)]
        force: bool,
    },
    /// Run analysis, file index, and function index in sequence
    FullIndex {
        /// Project root directory
        path: PathBuf,

        /// Rebuild everything from scratch
        #[arg(long)]
        force: bool,
    },
    /// Show per-index progress for a project
    Status {
        /// Project root directory
        path: PathBuf,
    },
    /// Semantic search over an indexed project
    Search {
        /// Project root directory
        path: PathBuf,

        /// Which index to search
        #[arg(value_enum)]
        kind: SearchKind,

        /// Natural-language query
        query: String,

        /// Number of results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Filter by language tag
        #[arg(long)]
        language: Option<String>,

        /// Include matched source in the output
        #[arg(long)]
        code: bool,
    },
    /// Re-index specific files after edits
    Update {
        /// Project root directory
        path: PathBuf,

        /// Relative file paths to update
        files: Vec<String>,
    },
    /// Remove files from all indexes
    Remove {
        /// Project root directory
        path: PathBuf,

        /// Relative file paths to remove
        files: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeatlas=info".parse().expect("static directive parses")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let indexer = match Indexer::from_env() {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "Failed to initialize");
            return 1;
        }
    };

    let result = dispatch(&indexer, cli).await;
    match result {
        Ok(code) => code,
        Err(e) if e.is_precondition() => {
            eprintln!("precondition not met: {e}");
            2
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

async fn dispatch(indexer: &Indexer, cli: Cli) -> codeatlas_core::Result<i32> {
    match cli.command {
        Commands::Analyze { path, force } => {
            let analysis = indexer.analyze_project(&path, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                println!(
                    "analysis {} after {} iterations ({} files, min confidence {}%)",
                    if analysis.completed { "completed" } else { "incomplete" },
                    analysis.iteration_count,
                    analysis.files_analyzed.len(),
                    analysis.min_confidence(),
                );
                if let Some(description) = &analysis.description.value {
                    println!("  {description}");
                }
            }
            Ok(if analysis.completed { 0 } else { 1 })
        }

        Commands::IndexFiles { path, force, include, exclude } => {
            let report = indexer
                .index_files(
                    &path,
                    force,
                    (!include.is_empty()).then_some(include),
                    (!exclude.is_empty()).then_some(exclude),
                )
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{:?}: {}/{} files indexed ({} chunks, {} skipped, {} failed) in {}ms",
                    report.status,
                    report.indexed_files,
                    report.total_files,
                    report.total_chunks,
                    report.skipped_files,
                    report.failed_files,
                    report.duration_ms,
                );
                for err in &report.errors {
                    eprintln!("  {err}");
                }
            }
            Ok(status_code(report.status))
        }

        Commands::IndexFunctions { path, force } => {
            let report = indexer.index_functions(&path, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{:?}: {}/{} files, {} functions indexed ({} failed) in {}ms",
                    report.status,
                    report.processed_files,
                    report.total_files,
                    report.indexed_functions,
                    report.failed_files,
                    report.duration_ms,
                );
                for err in &report.errors {
                    eprintln!("  {err}");
                }
            }
            Ok(status_code(report.status))
        }

        Commands::FullIndex { path, force } => {
            let report = indexer.full_index(&path, force).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{:?}: analysis min confidence {}%, {} chunks, {} functions",
                    report.status,
                    report.min_confidence,
                    report.files.total_chunks,
                    report.functions.as_ref().map(|f| f.indexed_functions).unwrap_or(0),
                );
            }
            Ok(status_code(report.status))
        }

        Commands::Status { path } => {
            let status = indexer.check_status(&path)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "analysis: {} (iterations {}, min confidence {}%, {} files read)",
                    status.analysis.status,
                    status.analysis.iteration_count,
                    status.analysis.min_confidence,
                    status.analysis.files_analyzed,
                );
                println!(
                    "files:     {}/{} completed, {} failed, {} chunks",
                    status.files.completed, status.files.total, status.files.failed, status.files.artifacts,
                );
                println!(
                    "functions: {}/{} completed, {} failed, {} functions",
                    status.functions.completed,
                    status.functions.total,
                    status.functions.failed,
                    status.functions.artifacts,
                );
            }
            Ok(0)
        }

        Commands::Search { path, kind, query, top_k, language, code } => {
            let filters = language
                .map(|l| vec![("language".to_string(), codeatlas_core::vector::MetaValue::from(l))])
                .unwrap_or_default();

            match kind {
                SearchKind::Files => {
                    let hits = indexer
                        .search_files(&path, &query, top_k, filters, code, true)
                        .await?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&hits)?);
                    } else {
                        for hit in &hits {
                            println!(
                                "{:.3}  {} [{}] {}",
                                hit.score, hit.relative_path, hit.language, hit.purpose
                            );
                            if let Some(code) = &hit.code {
                                for line in code.lines().take(5) {
                                    println!("      | {line}");
                                }
                            }
                        }
                        if hits.is_empty() {
                            println!("no results");
                        }
                    }
                }
                SearchKind::Functions => {
                    let hits =
                        indexer.search_functions(&path, &query, top_k, filters, code).await?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&hits)?);
                    } else {
                        for hit in &hits {
                            let qualified = if hit.class_name.is_empty() {
                                hit.function_name.clone()
                            } else {
                                format!("{}.{}", hit.class_name, hit.function_name)
                            };
                            println!(
                                "{:.3}  {} ({}:{}) [{}] {}",
                                hit.score,
                                qualified,
                                hit.relative_path,
                                hit.line_start,
                                hit.layer,
                                hit.description,
                            );
                        }
                        if hits.is_empty() {
                            println!("no results");
                        }
                    }
                }
            }
            Ok(0)
        }

        Commands::Update { path, files } => {
            let report = indexer.update_files(&path, &files).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "updated {} files ({} chunks); functions: {}",
                    report.files.indexed_files,
                    report.files.total_chunks,
                    report
                        .functions
                        .as_ref()
                        .map(|f| format!("{} indexed", f.indexed_functions))
                        .unwrap_or_else(|| "no function index".to_string()),
                );
            }
            Ok(status_code(report.files.status))
        }

        Commands::Remove { path, files } => {
            let report = indexer.remove_files(&path, &files).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "removed {} files: {} file documents, {} function documents",
                    report.removed_files, report.file_documents, report.function_documents,
                );
            }
            Ok(0)
        }
    }
}

fn status_code(status: OpStatus) -> i32 {
    match status {
        OpStatus::Success | OpStatus::Partial => 0,
        OpStatus::Failed => 1,
    }
}
