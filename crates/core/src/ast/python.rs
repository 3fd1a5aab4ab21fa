//! Python extractor: functions (decorators, docstrings, async), call edges,
//! imports, FastAPI/Flask-style trigger detection, and import resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

use super::{
    end_line, node_text, parse_source, split_qualified, start_line, truncate_arg, FileSyntax,
    LanguageExtractor,
};
use crate::error::Result;
use crate::types::{
    CallEdge, FunctionRecord, ImportRecord, Language, Layer, TriggerInfo, TriggerKind,
};

const HTTP_DECORATORS: &[&str] = &[
    "app.get", "app.post", "app.put", "app.delete", "app.patch",
    "router.get", "router.post", "router.put", "router.delete", "router.patch",
    "route", "api_view", "require_http_methods",
];
const KAFKA_DECORATORS: &[&str] = &["kafka.consumer", "consumer", "kafka_consumer"];
const SCHEDULED_DECORATORS: &[&str] = &["celery.task", "shared_task", "periodic_task", "task"];
const GRAPHQL_DECORATORS: &[&str] = &["query", "mutation", "subscription", "field"];

pub struct PythonExtractor;

struct Walker<'a> {
    source: &'a str,
    rel_path: &'a str,
    out: FileSyntax,
}

impl<'a> Walker<'a> {
    /// Recursive descent with the enclosing class/function carried as
    /// explicit arguments.
    fn visit(&mut self, node: Node, class: Option<&str>, function: Option<&str>) {
        match node.kind() {
            "decorated_definition" => {
                let decorators = collect_decorators(node, self.source);
                if let Some(def) = node.child_by_field_name("definition") {
                    if def.kind() == "function_definition" {
                        // Use the decorated node so the stored source keeps
                        // the decorators
                        self.visit_function(def, node, class, decorators);
                        return;
                    }
                }
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, class, function);
                }
            }
            "class_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source).to_string());
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, name.as_deref().or(class), function);
                }
            }
            "function_definition" => {
                self.visit_function(node, node, class, Vec::new());
            }
            "call" => {
                if let Some(function_name) = function {
                    self.record_call(node, function_name);
                }
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, class, function);
                }
            }
            "import_statement" | "import_from_statement" => {
                if let Some(import) = extract_import(node, self.source) {
                    self.out.imports.push(import);
                }
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, class, function);
                }
            }
        }
    }

    fn visit_function(
        &mut self,
        def: Node,
        source_node: Node,
        class: Option<&str>,
        decorators: Vec<String>,
    ) {
        let Some(name_node) = def.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source).to_string();

        let is_async = {
            let mut cursor = def.walk();
            let result = def.children(&mut cursor).any(|c| c.kind() == "async");
            result
        };

        let parameters = def
            .child_by_field_name("parameters")
            .map(|params| extract_parameters(params, self.source))
            .unwrap_or_default();

        let return_type = def
            .child_by_field_name("return_type")
            .map(|n| node_text(n, self.source).to_string());

        let docstring = def.child_by_field_name("body").and_then(|b| extract_docstring(b, self.source));

        self.out.functions.push(FunctionRecord {
            name: name.clone(),
            rel_path: self.rel_path.to_string(),
            line_start: start_line(def),
            line_end: end_line(def),
            source: node_text(source_node, self.source).to_string(),
            parameters,
            return_type,
            is_async,
            is_method: class.is_some(),
            class_name: class.map(|c| c.to_string()),
            decorators,
            docstring,
        });

        // Walk the body with this function as the caller context
        let mut cursor = def.walk();
        for child in def.children(&mut cursor) {
            self.visit(child, class, Some(&name));
        }
    }

    fn record_call(&mut self, node: Node, caller: &str) {
        let Some(function_node) = node.child_by_field_name("function") else {
            return;
        };
        let callee_text = node_text(function_node, self.source);
        // Skip calls on computed expressions like `items[0]()`
        if callee_text.contains(['(', '[']) {
            return;
        }
        let (callee_module, callee_name) = split_qualified(callee_text);

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

fn collect_decorators(decorated: Node, source: &str) -> Vec<String> {
    let mut decorators = Vec::new();
    let mut cursor = decorated.walk();
    for child in decorated.children(&mut cursor) {
        if child.kind() == "decorator" {
            decorators.push(node_text(child, source).trim_start_matches('@').trim().to_string());
        }
    }
    decorators
}

fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        let name = match child.kind() {
            "identifier" => Some(node_text(child, source).to_string()),
            "typed_parameter" | "typed_default_parameter" | "default_parameter" => child
                .child_by_field_name("name")
                .or_else(|| {
                    let mut inner = child.walk();
                    let result = child.named_children(&mut inner).find(|n| n.kind() == "identifier");
                    result
                })
                .map(|n| node_text(n, source).to_string()),
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                Some(node_text(child, source).to_string())
            }
            _ => None,
        };
        if let Some(name) = name {
            out.push(name);
        }
    }
    out
}

/// Docstring: a string literal as the first statement of the body.
fn extract_docstring(body: Node, source: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let inner = first.named_child(0)?;
    if inner.kind() != "string" {
        return None;
    }
    let raw = node_text(inner, source);
    Some(raw.trim_matches(['"', '\'', ' ', '\n']).to_string())
}

fn extract_import(node: Node, source: &str) -> Option<ImportRecord> {
    match node.kind() {
        "import_statement" => {
            // import x.y [as z]
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "dotted_name" => {
                        return Some(ImportRecord {
                            module: node_text(child, source).to_string(),
                            names: Vec::new(),
                            alias: None,
                        });
                    }
                    "aliased_import" => {
                        let module = child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, source).to_string())?;
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, source).to_string());
                        return Some(ImportRecord { module, names: Vec::new(), alias });
                    }
                    _ => {}
                }
            }
            None
        }
        "import_from_statement" => {
            // from x.y import a, b [as c] | from x import *
            let module_node = node.child_by_field_name("module_name")?;
            let module = node_text(module_node, source).to_string();
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.id() == module_node.id() {
                    continue;
                }
                match child.kind() {
                    "dotted_name" | "identifier" => {
                        names.push(node_text(child, source).to_string());
                    }
                    "aliased_import" => {
                        if let Some(n) = child.child_by_field_name("name") {
                            names.push(node_text(n, source).to_string());
                        }
                    }
                    // wildcard_import leaves names empty
                    _ => {}
                }
            }
            Some(ImportRecord { module, names, alias: None })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Trigger parsing
// ---------------------------------------------------------------------------

fn parse_http_decorator(decorator: &str) -> (String, String) {
    let method = [".get", ".post", ".put", ".delete", ".patch"]
        .iter()
        .find(|m| decorator.contains(**m))
        .map(|m| m[1..].to_uppercase())
        .unwrap_or_else(|| "GET".to_string());
    let path = quoted_argument(decorator).unwrap_or_else(|| "/".to_string());
    (method, path)
}

fn quoted_argument(decorator: &str) -> Option<String> {
    let re = regex::Regex::new(r#"["']([^"']+)["']"#).ok()?;
    re.captures(decorator).map(|c| c[1].to_string())
}

fn decorator_matches(decorator: &str, table: &[&str]) -> bool {
    table.iter().any(|entry| decorator.starts_with(entry))
}

fn triggers_from_decorators(name: &str, decorators: &[String]) -> Vec<TriggerInfo> {
    let mut triggers = Vec::new();
    for decorator in decorators {
        let mut metadata = BTreeMap::new();
        metadata.insert("decorator".to_string(), decorator.clone());
        if decorator_matches(decorator, HTTP_DECORATORS) {
            let (method, path) = parse_http_decorator(decorator);
            metadata.insert("method".to_string(), method);
            metadata.insert("path".to_string(), path);
            triggers.push(TriggerInfo {
                function_name: name.to_string(),
                kind: TriggerKind::Http,
                metadata,
            });
        } else if decorator_matches(decorator, KAFKA_DECORATORS) {
            metadata.insert(
                "topic".to_string(),
                quoted_argument(decorator).unwrap_or_else(|| "unknown".into()),
            );
            triggers.push(TriggerInfo {
                function_name: name.to_string(),
                kind: TriggerKind::Kafka,
                metadata,
            });
        } else if decorator_matches(decorator, SCHEDULED_DECORATORS) {
            let schedule = if decorator.contains("cron") {
                "cron"
            } else if decorator.contains("interval") {
                "interval"
            } else {
                "task"
            };
            metadata.insert("schedule".to_string(), schedule.to_string());
            triggers.push(TriggerInfo {
                function_name: name.to_string(),
                kind: TriggerKind::Scheduled,
                metadata,
            });
        } else if decorator_matches(decorator, GRAPHQL_DECORATORS) {
            triggers.push(TriggerInfo {
                function_name: name.to_string(),
                kind: TriggerKind::Graphql,
                metadata,
            });
        }
    }
    triggers
}

/// Text-pattern fallback when the file does not parse.
fn detect_triggers_regex(source: &str) -> Vec<TriggerInfo> {
    let mut triggers = Vec::new();
    let Ok(re) = regex::Regex::new(
        r#"@(?:\w+\.)?(get|post|put|delete|patch)\(["']([^"']+)["']\)"#,
    ) else {
        return triggers;
    };
    let Ok(def_re) = regex::Regex::new(r"def\s+(\w+)") else {
        return triggers;
    };
    for found in re.captures_iter(source) {
        let after = &source[found.get(0).map(|m| m.end()).unwrap_or(0)..];
        let mut window_end = after.len().min(200);
        while !after.is_char_boundary(window_end) {
            window_end -= 1;
        }
        if let Some(def) = def_re.captures(&after[..window_end]) {
            let mut metadata = BTreeMap::new();
            metadata.insert("method".to_string(), found[1].to_uppercase());
            metadata.insert("path".to_string(), found[2].to_string());
            triggers.push(TriggerInfo {
                function_name: def[1].to_string(),
                kind: TriggerKind::Http,
                metadata,
            });
        }
    }
    triggers
}

// ---------------------------------------------------------------------------
// LanguageExtractor impl
// ---------------------------------------------------------------------------

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax> {
        let tree = parse_source(source, Language::Python)?;
        let mut walker = Walker { source, rel_path, out: FileSyntax::default() };
        walker.visit(tree.root_node(), None, None);
        Ok(walker.out)
    }

    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo> {
        match self.extract(source, "") {
            Ok(syntax) => syntax
                .functions
                .iter()
                .flat_map(|f| triggers_from_decorators(&f.name, &f.decorators))
                .collect(),
            Err(_) => detect_triggers_regex(source),
        }
    }

    fn resolve_import(
        &self,
        module: &str,
        current_file: &Path,
        project_root: &Path,
    ) -> Option<PathBuf> {
        let candidates = if let Some(stripped) = module.strip_prefix('.') {
            // Relative import: one leading dot is the current package, each
            // further dot ascends one level
            let ascend = stripped.len() - stripped.trim_start_matches('.').len();
            let remainder = stripped.trim_start_matches('.');
            let mut dir = current_file.parent()?.to_path_buf();
            for _ in 0..ascend {
                dir = dir.parent()?.to_path_buf();
            }
            let base = if remainder.is_empty() {
                dir
            } else {
                dir.join(remainder.replace('.', "/"))
            };
            vec![base.with_extension("py"), base.join("__init__.py")]
        } else {
            let base = project_root.join(module.replace('.', "/"));
            vec![
                base.with_extension("py"),
                base.join("__init__.py"),
                project_root.join("src").join(module.replace('.', "/")).with_extension("py"),
            ]
        };
        candidates.into_iter().find(|c| c.is_file())
    }

    fn classify_layer(&self, rel_path: &str, decorators: &[String]) -> Layer {
        let path = rel_path.to_lowercase();
        if ["controller", "api", "handler", "view", "endpoint"].iter().any(|p| path.contains(p)) {
            return Layer::Controller;
        }
        if ["service", "business", "domain", "usecase", "logic"].iter().any(|p| path.contains(p)) {
            return Layer::Service;
        }
        if ["provider", "adapter", "integration", "repository", "dao", "client"]
            .iter()
            .any(|p| path.contains(p))
        {
            return Layer::Provider;
        }
        let external = ["requests.", "httpx.", "aiohttp.", "boto3.", "stripe."];
        if decorators.iter().any(|d| external.iter().any(|e| d.contains(e))) {
            return Layer::External;
        }
        Layer::Service
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
