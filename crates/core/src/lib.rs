//! CodeAtlas core — layered semantic indexing and search for source
//! repositories.
//!
//! Three indexes build on each other: an iteratively-refined project
//! analysis, a per-file semantic index over token-bounded chunks, and a
//! per-function index fed by tree-sitter extraction. Progress is
//! checkpointed per unit of work, so interrupted runs resume without
//! re-spending LLM calls, and every external call flows through a shared
//! dual token-bucket rate limiter.

pub mod analysis;
pub mod ast;
pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod error;
pub mod file_index;
pub mod function_index;
pub mod limiter;
pub mod orchestrator;
pub mod providers;
pub mod query;
pub mod scan;
pub mod tokenizer;
pub mod triggers;
pub mod types;
pub mod vector;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{FullIndexReport, Indexer, RemovalReport, StatusReport, UpdateReport};
pub use types::{
    FileIndexReport, FunctionIndexReport, Language, OpStatus, ProjectAnalysis,
};
