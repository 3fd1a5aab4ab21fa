//! JavaScript / TypeScript extractor. Handles function declarations, class
//! methods, arrow functions bound to names, ES imports, Express/NestJS
//! trigger patterns, and relative-import resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

use super::{
    end_line, node_text, parse_source, start_line, truncate_arg, FileSyntax, LanguageExtractor,
};
use crate::error::Result;
use crate::types::{
    CallEdge, FunctionRecord, ImportRecord, Language, Layer, TriggerInfo, TriggerKind,
};

pub struct JsExtractor {
    language: Language,
}

impl JsExtractor {
    pub fn new(language: Language) -> Self {
        JsExtractor { language }
    }
}

struct Walker<'a> {
    source: &'a str,
    rel_path: &'a str,
    out: FileSyntax,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node, class: Option<&str>, function: Option<&str>) {
        match node.kind() {
            "class_declaration" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source).to_string());
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, name.as_deref().or(class), function);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name_node) = node.child_by_field_name("name") {
                    let name = node_text(name_node, self.source).to_string();
                    self.push_function(node, node, &name, class, Vec::new());
                    self.walk_body(node, class, &name);
                    return;
                }
                self.walk_children(node, class, function);
            }
            "method_definition" => {
                if let Some(name_node) = node.child_by_field_name("name") {
                    let name = node_text(name_node, self.source).to_string();
                    let decorators = preceding_decorators(node, self.source);
                    self.push_function(node, node, &name, class, decorators);
                    self.walk_body(node, class, &name);
                    return;
                }
                self.walk_children(node, class, function);
            }
            "variable_declarator" => {
                // const handler = async (req) => { ... }
                let value = node.child_by_field_name("value");
                let name_node = node.child_by_field_name("name");
                if let (Some(name_node), Some(value)) = (name_node, value) {
                    if matches!(value.kind(), "arrow_function" | "function_expression" | "function")
                    {
                        let name = node_text(name_node, self.source).to_string();
                        self.push_function(value, node, &name, class, Vec::new());
                        self.walk_body(value, class, &name);
                        return;
                    }
                }
                self.walk_children(node, class, function);
            }
            "call_expression" => {
                if let Some(function_name) = function {
                    self.record_call(node, function_name);
                }
                self.walk_children(node, class, function);
            }
            "import_statement" => {
                if let Some(import) = extract_import(node, self.source) {
                    self.out.imports.push(import);
                }
            }
            _ => self.walk_children(node, class, function),
        }
    }

    fn walk_children(&mut self, node: Node, class: Option<&str>, function: Option<&str>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, class, function);
        }
    }

    fn walk_body(&mut self, node: Node, class: Option<&str>, function: &str) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, class, Some(function));
        }
    }

    fn push_function(
        &mut self,
        def: Node,
        source_node: Node,
        name: &str,
        class: Option<&str>,
        decorators: Vec<String>,
    ) {
        let is_async = {
            let mut cursor = def.walk();
            def.children(&mut cursor).any(|c| c.kind() == "async")
                || node_text(def, self.source).trim_start().starts_with("async")
        };

        let parameters = def
            .child_by_field_name("parameters")
            .map(|params| extract_parameters(params, self.source))
            .unwrap_or_default();

        let return_type = def.child_by_field_name("return_type").map(|n| {
            node_text(n, self.source).trim_start_matches(':').trim().to_string()
        });

        self.out.functions.push(FunctionRecord {
            name: name.to_string(),
            rel_path: self.rel_path.to_string(),
            line_start: start_line(source_node),
            line_end: end_line(source_node),
            source: node_text(source_node, self.source).to_string(),
            parameters,
            return_type,
            is_async,
            is_method: def.kind() == "method_definition" || class.is_some(),
            class_name: class.map(|c| c.to_string()),
            decorators,
            docstring: jsdoc_before(source_node, self.source),
        });
    }

    fn record_call(&mut self, node: Node, caller: &str) {
        let Some(function_node) = node.child_by_field_name("function") else {
            return;
        };
        let (callee_module, callee_name) = match function_node.kind() {
            "identifier" => (None, node_text(function_node, self.source).to_string()),
            "member_expression" => {
                let object = function_node.child_by_field_name("object");
                let property = function_node.child_by_field_name("property");
                match (object, property) {
                    (Some(o), Some(p)) => {
                        let object_text = node_text(o, self.source);
                        if object_text.contains(['(', '[']) {
                            return;
                        }
                        (
                            Some(object_text.to_string()),
                            node_text(p, self.source).to_string(),
                        )
                    }
                    _ => return,
                }
            }
            _ => return,
        };

        let arguments = node
            .child_by_field_name("arguments")
            .map(|args| {
                let mut cursor = args.walk();
                args.named_children(&mut cursor)
                    .map(|a| truncate_arg(node_text(a, self.source)))
                    .collect()
            })
            .unwrap_or_default();

        self.out.calls.push(CallEdge {
            caller: caller.to_string(),
            callee_name,
            callee_module,
            line: start_line(node),
            arguments,
        });
    }
}

fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(node_text(child, source).to_string()),
            "required_parameter" | "optional_parameter" => {
                if let Some(pattern) = child.child_by_field_name("pattern") {
                    out.push(node_text(pattern, source).to_string());
                } else if let Some(name) = super::first_identifier(child, source, &["identifier"]) {
                    out.push(name);
                }
            }
            "rest_pattern" | "object_pattern" | "array_pattern" | "assignment_pattern" => {
                out.push(node_text(child, source).to_string());
            }
            _ => {}
        }
    }
    out
}

/// TS decorators attached as preceding siblings of a method definition.
fn preceding_decorators(node: Node, source: &str) -> Vec<String> {
    let mut decorators = Vec::new();
    let mut sibling = node.prev_sibling();
    while let Some(prev) = sibling {
        if prev.kind() == "decorator" {
            decorators.insert(0, node_text(prev, source).trim_start_matches('@').to_string());
            sibling = prev.prev_sibling();
        } else {
            break;
        }
    }
    decorators
}

fn jsdoc_before(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let text = node_text(prev, source);
    if !text.starts_with("/**") {
        return None;
    }
    let cleaned = text
        .trim_start_matches("/**")
        .trim_end_matches("*/")
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty() && !l.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn extract_import(node: Node, source: &str) -> Option<ImportRecord> {
    let source_node = node.child_by_field_name("source")?;
    let module = node_text(source_node, source).trim_matches(['"', '\'', '`']).to_string();

    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "import_clause" {
            let mut inner = child.walk();
            for clause in child.children(&mut inner) {
                match clause.kind() {
                    // default import
                    "identifier" => names.push(node_text(clause, source).to_string()),
                    "named_imports" => {
                        let mut specs = clause.walk();
                        for spec in clause.named_children(&mut specs) {
                            if spec.kind() == "import_specifier" {
                                let name = spec
                                    .child_by_field_name("name")
                                    .map(|n| node_text(n, source).to_string());
                                if let Some(name) = name {
                                    names.push(name);
                                }
                            }
                        }
                    }
                    // namespace import leaves names empty (whole module)
                    _ => {}
                }
            }
        }
    }
    Some(ImportRecord { module, names, alias: None })
}

// ---------------------------------------------------------------------------
// LanguageExtractor impl
// ---------------------------------------------------------------------------

impl LanguageExtractor for JsExtractor {
    fn language(&self) -> Language {
        self.language
    }

    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax> {
        let tree = parse_source(source, self.language)?;
        let mut walker = Walker { source, rel_path, out: FileSyntax::default() };
        walker.visit(tree.root_node(), None, None);
        Ok(walker.out)
    }

    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo> {
        let mut triggers = Vec::new();

        // Express-style: app.get('/path', handler) / router.post(...)
        if let Ok(re) = regex::Regex::new(
            r#"(?:app|router)\.(get|post|put|delete|patch)\(\s*["']([^"']+)["']\s*,\s*(\w+)?"#,
        ) {
            for found in re.captures_iter(source) {
                let mut metadata = BTreeMap::new();
                metadata.insert("method".to_string(), found[1].to_uppercase());
                metadata.insert("path".to_string(), found[2].to_string());
                triggers.push(TriggerInfo {
                    function_name: found
                        .get(3)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| "anonymous".to_string()),
                    kind: TriggerKind::Http,
                    metadata,
                });
            }
        }

        // NestJS-style: @Get('/path') above a method
        if let Ok(re) =
            regex::Regex::new(r#"@(Get|Post|Put|Delete|Patch)\(\s*["']?([^"')]*)["']?\s*\)"#)
        {
            for found in re.captures_iter(source) {
                let after = &source[found.get(0).map(|m| m.end()).unwrap_or(0)..];
                let mut window = after.len().min(200);
                while !after.is_char_boundary(window) {
                    window -= 1;
                }
                if let Some(method) = regex::Regex::new(r"(?:async\s+)?(\w+)\s*\(")
                    .ok()
                    .and_then(|m| m.captures(&after[..window]))
                {
                    let mut metadata = BTreeMap::new();
                    metadata.insert("method".to_string(), found[1].to_uppercase());
                    let path = if found[2].is_empty() { "/" } else { &found[2] };
                    metadata.insert("path".to_string(), path.to_string());
                    triggers.push(TriggerInfo {
                        function_name: method[1].to_string(),
                        kind: TriggerKind::Http,
                        metadata,
                    });
                }
            }
        }

        triggers
    }

    fn resolve_import(
        &self,
        module: &str,
        current_file: &Path,
        project_root: &Path,
    ) -> Option<PathBuf> {
        let base = if module.starts_with('.') {
            current_file.parent()?.join(module)
        } else {
            project_root.join(module)
        };

        let extensions = ["ts", "tsx", "js", "jsx", "mjs"];
        if base.extension().is_some() && base.is_file() {
            return Some(clean_path(&base));
        }
        for ext in extensions {
            let candidate = base.with_extension(ext);
            if candidate.is_file() {
                return Some(clean_path(&candidate));
            }
        }
        for ext in extensions {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(clean_path(&candidate));
            }
        }
        None
    }

    fn classify_layer(&self, rel_path: &str, decorators: &[String]) -> Layer {
        for decorator in decorators {
            if decorator.starts_with("Controller") {
                return Layer::Controller;
            }
            if decorator.starts_with("Injectable") {
                return Layer::Service;
            }
        }
        let path = rel_path.to_lowercase();
        if ["controller", "api", "handler", "route"].iter().any(|p| path.contains(p)) {
            return Layer::Controller;
        }
        if ["service", "business", "domain", "usecase"].iter().any(|p| path.contains(p)) {
            return Layer::Service;
        }
        if ["provider", "adapter", "integration", "repository", "client"]
            .iter()
            .any(|p| path.contains(p))
        {
            return Layer::Provider;
        }
        Layer::Service
    }

    fn format_signature(
        &self,
        name: &str,
        parameters: &[String],
        return_type: Option<&str>,
    ) -> String {
        let params = parameters.join(", ");
        match return_type {
            Some(ret) => format!("{name}({params}): {ret}"),
            None => format!("{name}({params})"),
        }
    }
}

/// Collapse `a/./b` and `a/x/../b` segments introduced by relative imports.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
