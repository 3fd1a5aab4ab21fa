//! Generic fallback extractor for languages without a dedicated variant.
//!
//! Uses a canonical set of node-type names shared across tree-sitter
//! grammars for best-effort function and call extraction. Languages without
//! a compiled-in grammar produce empty output rather than an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

use super::{
    end_line, grammar_for, node_text, parse_source, start_line, FileSyntax, LanguageExtractor,
};
use crate::error::Result;
use crate::types::{CallEdge, FunctionRecord, Language, Layer, TriggerInfo, TriggerKind};

/// Function-definition node kinds seen across grammars.
const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "function_definition",
    "method_declaration",
    "function_item",
    "func_literal",
    "class_method",
];

/// Call-expression node kinds seen across grammars.
const CALL_KINDS: &[&str] = &[
    "call_expression",
    "function_call",
    "method_invocation",
    "call",
    "invocation_expression",
];

const IDENTIFIER_KINDS: &[&str] =
    &["identifier", "property_identifier", "simple_identifier", "field_identifier"];

pub struct GenericExtractor {
    language: Language,
}

impl GenericExtractor {
    pub fn new(language: Language) -> Self {
        GenericExtractor { language }
    }

    fn visit(&self, node: Node, source: &str, rel_path: &str, function: Option<&str>, out: &mut FileSyntax) {
        if FUNCTION_KINDS.contains(&node.kind()) {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .or_else(|| super::first_identifier(node, source, IDENTIFIER_KINDS));

            if let Some(name) = name {
                let parameters = node
                    .child_by_field_name("parameters")
                    .map(|params| {
                        let mut cursor = params.walk();
                        params
                            .named_children(&mut cursor)
                            .filter(|p| p.kind().contains("parameter") || IDENTIFIER_KINDS.contains(&p.kind()))
                            .map(|p| node_text(p, source).to_string())
                            .collect()
                    })
                    .unwrap_or_default();

                out.functions.push(FunctionRecord {
                    name: name.clone(),
                    rel_path: rel_path.to_string(),
                    line_start: start_line(node),
                    line_end: end_line(node),
                    source: node_text(node, source).to_string(),
                    parameters,
                    return_type: None,
                    is_async: false,
                    is_method: false,
                    class_name: None,
                    decorators: Vec::new(),
                    docstring: None,
                });

                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, source, rel_path, Some(&name), out);
                }
                return;
            }
        } else if CALL_KINDS.contains(&node.kind()) {
            if let Some(caller) = function {
                let callee = node
                    .child_by_field_name("function")
                    .map(|n| node_text(n, source).to_string())
                    .or_else(|| super::first_identifier(node, source, IDENTIFIER_KINDS));
                if let Some(callee) = callee {
                    if !callee.contains(['(', '[']) {
                        let (module, name) = super::split_qualified(&callee);
                        out.calls.push(CallEdge {
                            caller: caller.to_string(),
                            callee_name: name,
                            callee_module: module,
                            line: start_line(node),
                            arguments: Vec::new(),
                        });
                    }
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, source, rel_path, function, out);
        }
    }
}

impl LanguageExtractor for GenericExtractor {
    fn language(&self) -> Language {
        self.language
    }

    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax> {
        if grammar_for(self.language).is_none() {
            return Ok(FileSyntax::default());
        }
        let tree = parse_source(source, self.language)?;
        let mut out = FileSyntax::default();
        self.visit(tree.root_node(), source, rel_path, None, &mut out);
        Ok(out)
    }

    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo> {
        // Text-pattern fallback shared by all generic languages
        let mut triggers = Vec::new();
        if let Ok(re) = regex::Regex::new(
            r#"(?:app|router|server)\.(get|post|put|delete|patch)\(\s*["']([^"']+)["']"#,
        ) {
            for found in re.captures_iter(source) {
                let mut metadata = BTreeMap::new();
                metadata.insert("method".to_string(), found[1].to_uppercase());
                metadata.insert("path".to_string(), found[2].to_string());
                triggers.push(TriggerInfo {
                    function_name: "anonymous".to_string(),
                    kind: TriggerKind::Http,
                    metadata,
                });
            }
        }
        triggers
    }

    fn resolve_import(
        &self,
        _module: &str,
        _current_file: &Path,
        _project_root: &Path,
    ) -> Option<PathBuf> {
        None
    }

    fn classify_layer(&self, rel_path: &str, _decorators: &[String]) -> Layer {
        let path = rel_path.to_lowercase();
        if ["controller", "api", "handler", "endpoint", "view", "route"]
            .iter()
            .any(|p| path.contains(p))
        {
            return Layer::Controller;
        }
        if ["service", "business", "domain", "usecase", "logic", "core"]
            .iter()
            .any(|p| path.contains(p))
        {
            return Layer::Service;
        }
        if [
            "provider", "adapter", "integration", "repository", "dao", "client", "gateway",
            "storage", "database",
        ]
        .iter()
        .any(|p| path.contains(p))
        {
            return Layer::Provider;
        }
        Layer::Service
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_via_generic() {
        let src = r#"
pub fn greet(name: &str) -> String {
    format!("Hello, {name}")
}

fn helper(x: u32) -> u32 {
    compute(x)
}
"#;
        let syntax = GenericExtractor::new(Language::Rust).extract(src, "lib.rs").unwrap();
        let names: Vec<&str> = syntax.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"greet"));
        assert!(names.contains(&"helper"));
        assert!(syntax.calls.iter().any(|c| c.caller == "helper" && c.callee_name == "compute"));
    }

    #[test]
    fn test_no_grammar_is_empty() {
        let syntax = GenericExtractor::new(Language::Ruby).extract("def hi; end\n", "a.rb").unwrap();
        assert!(syntax.functions.is_empty());
        assert!(syntax.calls.is_empty());
    }

    #[test]
    fn test_generic_layer_paths() {
        let e = GenericExtractor::new(Language::Ruby);
        assert_eq!(e.classify_layer("app/controllers/users.rb", &[]), Layer::Controller);
        assert_eq!(e.classify_layer("app/storage/users.rb", &[]), Layer::Provider);
    }
}
