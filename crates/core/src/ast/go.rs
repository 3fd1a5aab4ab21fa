//! Go extractor: functions and methods (receiver-aware), selector calls,
//! imports, and net/http-style trigger detection.

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

pub struct GoExtractor;

struct Walker<'a> {
    source: &'a str,
    rel_path: &'a str,
    out: FileSyntax,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node, function: Option<&str>) {
        match node.kind() {
            "function_declaration" => self.visit_function(node, None),
            "method_declaration" => {
                let receiver = node
                    .child_by_field_name("receiver")
                    .map(|r| receiver_type(r, self.source));
                self.visit_function(node, receiver);
            }
            "call_expression" => {
                if let Some(function_name) = function {
                    self.record_call(node, function_name);
                }
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, function);
                }
            }
            "import_declaration" => {
                self.collect_imports(node);
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, function);
                }
            }
        }
    }

    fn visit_function(&mut self, node: Node, receiver: Option<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source).to_string();

        let parameters = node
            .child_by_field_name("parameters")
            .map(|params| parameter_names(params, self.source))
            .unwrap_or_default();

        let return_type = node
            .child_by_field_name("result")
            .map(|r| node_text(r, self.source).to_string());

        self.out.functions.push(FunctionRecord {
            name: name.clone(),
            rel_path: self.rel_path.to_string(),
            line_start: start_line(node),
            line_end: end_line(node),
            source: node_text(node, self.source).to_string(),
            parameters,
            return_type,
            // Go has no async marker; goroutines are call sites
            is_async: false,
            is_method: receiver.is_some(),
            class_name: receiver,
            decorators: Vec::new(),
            docstring: doc_comment_before(node, self.source),
        });

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, Some(&name));
        }
    }

    fn record_call(&mut self, node: Node, caller: &str) {
        let Some(function_node) = node.child_by_field_name("function") else {
            return;
        };
        let (callee_module, callee_name) = match function_node.kind() {
            "identifier" => (None, node_text(function_node, self.source).to_string()),
            "selector_expression" => {
                let operand = function_node.child_by_field_name("operand");
                let field = function_node.child_by_field_name("field");
                match (operand, field) {
                    (Some(o), Some(f)) => {
                        let operand_text = node_text(o, self.source);
                        if operand_text.contains(['(', '[']) {
                            return;
                        }
                        (
                            Some(operand_text.to_string()),
                            node_text(f, self.source).to_string(),
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

    fn collect_imports(&mut self, node: Node) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let mut cursor = current.walk();
            for child in current.children(&mut cursor) {
                match child.kind() {
                    "import_spec" => {
                        let path = child
                            .child_by_field_name("path")
                            .map(|p| node_text(p, self.source).trim_matches('"').to_string());
                        if let Some(module) = path {
                            let alias = child
                                .child_by_field_name("name")
                                .map(|n| node_text(n, self.source).to_string());
                            self.out.imports.push(ImportRecord {
                                module,
                                names: Vec::new(),
                                alias,
                            });
                        }
                    }
                    "import_spec_list" => stack.push(child),
                    _ => {}
                }
            }
        }
    }
}

fn receiver_type(receiver: Node, source: &str) -> String {
    // (s *Server) -> Server
    node_text(receiver, source)
        .trim_matches(['(', ')'])
        .rsplit([' ', '*'])
        .next()
        .unwrap_or("")
        .to_string()
}

fn parameter_names(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        if child.kind() == "parameter_declaration" || child.kind() == "variadic_parameter_declaration"
        {
            let mut inner = child.walk();
            let names: Vec<String> = child
                .children(&mut inner)
                .filter(|n| n.kind() == "identifier")
                .map(|n| node_text(n, source).to_string())
                .collect();
            if names.is_empty() {
                // Unnamed parameter: keep the type for the signature
                out.push(node_text(child, source).to_string());
            } else {
                out.extend(names);
            }
        }
    }
    out
}

/// Go doc comment: contiguous `//` lines immediately above the declaration.
fn doc_comment_before(node: Node, source: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut sibling = node.prev_sibling();
    while let Some(prev) = sibling {
        if prev.kind() == "comment" && end_line(prev) + lines.len() + 1 > start_line(node) - 1 {
            let text = node_text(prev, source).trim_start_matches("//").trim().to_string();
            lines.insert(0, text);
            sibling = prev.prev_sibling();
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

// ---------------------------------------------------------------------------
// LanguageExtractor impl
// ---------------------------------------------------------------------------

impl LanguageExtractor for GoExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax> {
        let tree = parse_source(source, Language::Go)?;
        let mut walker = Walker { source, rel_path, out: FileSyntax::default() };
        walker.visit(tree.root_node(), None);
        Ok(walker.out)
    }

    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo> {
        let mut triggers = Vec::new();

        // router.GET("/path", handler) / mux.HandleFunc("/path", handler)
        let patterns = [
            r#"\w+\.(GET|POST|PUT|DELETE|PATCH)\(\s*"([^"]+)"\s*,\s*([\w.]+)"#,
            r#"\w*[Mm]ux\.HandleFunc\(\s*"([^"]+)"\s*,\s*([\w.]+)"#,
            r#"http\.HandleFunc\(\s*"([^"]+)"\s*,\s*([\w.]+)"#,
        ];
        for (i, pattern) in patterns.iter().enumerate() {
            let Ok(re) = regex::Regex::new(pattern) else {
                continue;
            };
            for found in re.captures_iter(source) {
                let (method, path, handler) = if i == 0 {
                    (found[1].to_string(), found[2].to_string(), found[3].to_string())
                } else {
                    ("GET".to_string(), found[1].to_string(), found[2].to_string())
                };
                let mut metadata = BTreeMap::new();
                metadata.insert("method".to_string(), method);
                metadata.insert("path".to_string(), path);
                triggers.push(TriggerInfo {
                    function_name: handler.rsplit('.').next().unwrap_or(&handler).to_string(),
                    kind: TriggerKind::Http,
                    metadata,
                });
            }
        }
        triggers
    }

    fn resolve_import(
        &self,
        module: &str,
        _current_file: &Path,
        project_root: &Path,
    ) -> Option<PathBuf> {
        // Module paths need go.mod awareness; heuristically match the last
        // path segment against a package directory
        let last = module.rsplit('/').next()?;
        let candidate = project_root.join(last);
        if candidate.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&candidate)
                .ok()?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "go"))
                .collect();
            entries.sort();
            return entries.into_iter().next();
        }
        None
    }

    fn classify_layer(&self, rel_path: &str, _decorators: &[String]) -> Layer {
        let path = rel_path.to_lowercase();
        if ["handler", "controller", "api", "http"].iter().any(|p| path.contains(p)) {
            return Layer::Controller;
        }
        if ["service", "usecase", "business", "domain"].iter().any(|p| path.contains(p)) {
            return Layer::Service;
        }
        if ["repository", "repo", "storage", "db", "client"].iter().any(|p| path.contains(p)) {
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
            Some(ret) => format!("func {name}({params}) {ret}"),
            None => format!("func {name}({params})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_functions_and_methods() {
        let src = r#"
package main

import (
	"fmt"
	db "example.com/storage"
)

func Process(items []string) error {
	return save(items)
}

func (s *Server) Handle(w http.ResponseWriter, r *http.Request) {
	s.logger.Info("handling")
}
"#;
        let syntax = GoExtractor.extract(src, "main.go").unwrap();
        assert_eq!(syntax.functions.len(), 2);

        let process = &syntax.functions[0];
        assert_eq!(process.name, "Process");
        assert!(!process.is_method);
        assert_eq!(process.parameters, vec!["items"]);
        assert_eq!(process.return_type.as_deref(), Some("error"));

        let handle = &syntax.functions[1];
        assert_eq!(handle.name, "Handle");
        assert!(handle.is_method);
        assert_eq!(handle.class_name.as_deref(), Some("Server"));

        assert!(syntax.calls.iter().any(|c| c.caller == "Process" && c.callee_name == "save"));
        assert!(syntax.calls.iter().any(|c| {
            c.caller == "Handle"
                && c.callee_name == "Info"
                && c.callee_module.as_deref() == Some("s.logger")
        }));

        assert_eq!(syntax.imports.len(), 2);
        assert_eq!(syntax.imports[0].module, "fmt");
        assert_eq!(syntax.imports[1].module, "example.com/storage");
        assert_eq!(syntax.imports[1].alias.as_deref(), Some("db"));
    }

    #[test]
    fn test_http_triggers() {
        let src = r#"
func main() {
	router.GET("/users", listUsers)
	http.HandleFunc("/health", healthCheck)
}
"#;
        let triggers = GoExtractor.detect_triggers(src);
        assert!(triggers.iter().any(|t| {
            t.function_name == "listUsers" && t.metadata["path"] == "/users"
        }));
        assert!(triggers.iter().any(|t| t.function_name == "healthCheck"));
    }

    #[test]
    fn test_doc_comment() {
        let src = "package main\n\n// Process handles a batch.\n// It returns the first error.\nfunc Process() error {\n\treturn nil\n}\n";
        let syntax = GoExtractor.extract(src, "a.go").unwrap();
        assert_eq!(
            syntax.functions[0].docstring.as_deref(),
            Some("Process handles a batch. It returns the first error.")
        );
    }
}
