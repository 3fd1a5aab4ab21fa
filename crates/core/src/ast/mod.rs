//! tree-sitter AST extraction for the function index and call resolution.
//!
//! Each supported language implements [`LanguageExtractor`]: function
//! definitions, call edges, and import statements out of a source buffer,
//! plus the language-specific capabilities the classifier layers need
//! (trigger detection, import-to-path resolution, layer heuristics,
//! signature formatting). Unknown languages fall back to a generic
//! extractor driven by a shared set of node-type heuristics.

pub mod generic;
pub mod go;
pub mod javascript;
pub mod kotlin;
pub mod python;
pub mod resolve;

use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{Error, Result};
use crate::types::{CallEdge, FunctionRecord, ImportRecord, Language, Layer, TriggerInfo};

// ---------------------------------------------------------------------------
// Extraction output
// ---------------------------------------------------------------------------

/// Everything the AST layer produces for one file.
#[derive(Debug, Default)]
pub struct FileSyntax {
    pub functions: Vec<FunctionRecord>,
    pub calls: Vec<CallEdge>,
    pub imports: Vec<ImportRecord>,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Per-language extraction and classification capabilities.
pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> Language;

    /// Parse the source and extract functions, call edges, and imports.
    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax>;

    /// Detect entry-point triggers. Implementations prefer the AST and fall
    /// back to text patterns.
    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo>;

    /// Resolve an import module path to an on-disk file, if it is local.
    fn resolve_import(
        &self,
        module: &str,
        current_file: &Path,
        project_root: &Path,
    ) -> Option<PathBuf>;

    /// Path/decorator heuristics for the architectural layer. Trigger and
    /// external-call overrides are applied by the caller.
    fn classify_layer(&self, rel_path: &str, decorators: &[String]) -> Layer;

    /// Human-readable signature for display.
    fn format_signature(
        &self,
        name: &str,
        parameters: &[String],
        return_type: Option<&str>,
    ) -> String {
        let params = parameters.join(", ");
        match return_type {
            Some(ret) => format!("{name}({params}) -> {ret}"),
            None => format!("{name}({params})"),
        }
    }
}

/// Select the extractor for a language. Unknown or unsupported languages get
/// the generic extractor, which parses when a grammar exists and otherwise
/// produces nothing.
pub fn extractor_for(language: Language) -> Box<dyn LanguageExtractor> {
    match language {
        Language::Python => Box::new(python::PythonExtractor),
        Language::Kotlin => Box::new(kotlin::KotlinExtractor),
        Language::JavaScript | Language::TypeScript => {
            Box::new(javascript::JsExtractor::new(language))
        }
        Language::Go => Box::new(go::GoExtractor),
        other => Box::new(generic::GenericExtractor::new(other)),
    }
}

// ---------------------------------------------------------------------------
// Grammar table and shared helpers
// ---------------------------------------------------------------------------

/// tree-sitter grammar for a language, when one is compiled in.
pub(crate) fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Kotlin => Some(tree_sitter_kotlin_sg::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        _ => None,
    }
}

/// Parse a source buffer with the grammar for `language`.
pub(crate) fn parse_source(source: &str, language: Language) -> Result<Tree> {
    let grammar = grammar_for(language)
        .ok_or_else(|| Error::Config(format!("no grammar for {}", language.as_str())))?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| Error::Config(format!("grammar init for {}: {e}", language.as_str())))?;
    parser
        .parse(source, None)
        .ok_or_else(|| Error::Config(format!("parse failed for {}", language.as_str())))
}

/// Text of a node within the source buffer.
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based start line of a node.
pub(crate) fn start_line(node: Node) -> usize {
    node.start_position().row + 1
}

/// 1-based end line of a node (inclusive).
pub(crate) fn end_line(node: Node) -> usize {
    node.end_position().row + 1
}

/// First child whose kind is one of the given identifier kinds.
pub(crate) fn first_identifier(node: Node, source: &str, kinds: &[&str]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            return Some(node_text(child, source).to_string());
        }
    }
    None
}

/// Truncate a call argument to a displayable length.
pub(crate) fn truncate_arg(text: &str) -> String {
    if text.len() <= 50 {
        text.to_string()
    } else {
        let mut end = 50;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

/// Split a qualified callee like `module.sub.name` into (module hint, name).
pub(crate) fn split_qualified(callee: &str) -> (Option<String>, String) {
    match callee.rsplit_once('.') {
        Some((module, name)) => (Some(module.to_string()), name.to_string()),
        None => (None, callee.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_language() {
        assert_eq!(extractor_for(Language::Python).language(), Language::Python);
        assert_eq!(extractor_for(Language::Kotlin).language(), Language::Kotlin);
        assert_eq!(extractor_for(Language::TypeScript).language(), Language::TypeScript);
        assert_eq!(extractor_for(Language::Go).language(), Language::Go);
        // Unknown tags resolve to the generic extractor
        assert_eq!(extractor_for(Language::Ruby).language(), Language::Ruby);
    }

    #[test]
    fn test_generic_handles_missing_grammar() {
        let extractor = extractor_for(Language::Ruby);
        let syntax = extractor.extract("def hi; end", "a.rb").unwrap();
        assert!(syntax.functions.is_empty());
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("g"), (None, "g".to_string()));
        assert_eq!(
            split_qualified("pkg.mod.f"),
            (Some("pkg.mod".to_string()), "f".to_string())
        );
    }
}
