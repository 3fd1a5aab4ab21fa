//! Kotlin extractor: suspend functions, class methods, annotations as
//! decorators, KDoc docstrings, navigation-expression calls, and Spring /
//! gRPC trigger detection.

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

const HTTP_ANNOTATIONS: &[&str] = &[
    "GetMapping", "PostMapping", "PutMapping", "DeleteMapping", "PatchMapping", "RequestMapping",
];

pub struct KotlinExtractor;

struct Walker<'a> {
    source: &'a str,
    rel_path: &'a str,
    out: FileSyntax,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node, class: Option<&str>, function: Option<&str>) {
        match node.kind() {
            "class_declaration" | "object_declaration" => {
                let name = class_name(node, self.source);
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, name.as_deref().or(class), function);
                }
            }
            "function_declaration" => {
                self.visit_function(node, class);
            }
            "call_expression" => {
                if let Some(function_name) = function {
                    self.record_call(node, function_name);
                }
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.visit(child, class, function);
                }
            }
            "import_header" => {
                if let Some(import) = parse_import_header(node_text(node, self.source)) {
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

    fn visit_function(&mut self, node: Node, class: Option<&str>) {
        let Some(name) = simple_identifier(node, self.source) else {
            return;
        };

        let modifier_text = modifiers_text(node, self.source);
        let is_async = modifier_text.contains("suspend");
        let decorators = annotations(node, self.source);
        let parameters = parameter_names(node, self.source);
        let return_type = return_type(node, self.source);
        let docstring = kdoc_before(node, self.source);

        self.out.functions.push(FunctionRecord {
            name: name.clone(),
            rel_path: self.rel_path.to_string(),
            line_start: start_line(node),
            line_end: end_line(node),
            source: node_text(node, self.source).to_string(),
            parameters,
            return_type,
            is_async,
            is_method: class.is_some(),
            class_name: class.map(|c| c.to_string()),
            decorators,
            docstring,
        });

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, class, Some(&name));
        }
    }

    fn record_call(&mut self, node: Node, caller: &str) {
        // call_expression = <callee expression> <call_suffix>
        let Some(callee) = node.named_child(0) else {
            return;
        };
        let (callee_module, callee_name) = match callee.kind() {
            "simple_identifier" | "identifier" => {
                (None, node_text(callee, self.source).to_string())
            }
            "navigation_expression" => {
                let text = node_text(callee, self.source);
                match text.rsplit_once('.') {
                    Some((receiver, name)) if !name.is_empty() => {
                        (Some(receiver.to_string()), name.to_string())
                    }
                    _ => return,
                }
            }
            _ => return,
        };
        if callee_name.contains(['(', '{', '[']) {
            return;
        }

        let arguments = value_arguments(node, self.source);
        self.out.calls.push(CallEdge {
            caller: caller.to_string(),
            callee_name,
            callee_module,
            line: start_line(node),
            arguments,
        });
    }
}

// ---------------------------------------------------------------------------
// Node helpers (defensive across grammar revisions)
// ---------------------------------------------------------------------------

fn simple_identifier(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "simple_identifier" | "identifier" | "type_identifier") {
            return Some(node_text(child, source).to_string());
        }
    }
    None
}

fn class_name(node: Node, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(child.kind(), "type_identifier" | "simple_identifier" | "identifier") {
            return Some(node_text(child, source).to_string());
        }
    }
    None
}

fn modifiers_text(node: Node, source: &str) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "modifiers" {
            return node_text(child, source).to_string();
        }
    }
    // Some grammar revisions attach `suspend` as a bare keyword child
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|c| c.kind() == "suspend")
        .map(|c| node_text(c, source).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Annotations on a declaration, from direct children or the modifiers
/// subtree, with the leading `@` stripped.
fn annotations(node: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "annotation" {
            out.push(node_text(child, source).trim_start_matches('@').trim().to_string());
        } else if child.kind() == "modifiers" {
            let mut inner = child.walk();
            for modifier in child.children(&mut inner) {
                if modifier.kind() == "annotation" {
                    out.push(
                        node_text(modifier, source).trim_start_matches('@').trim().to_string(),
                    );
                }
            }
        }
    }
    out
}

fn parameter_names(node: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "function_value_parameters" {
            let mut inner = child.walk();
            for param in child.named_children(&mut inner) {
                if param.kind() == "parameter" {
                    if let Some(name) = simple_identifier(param, source) {
                        out.push(name);
                    }
                }
            }
        }
    }
    out
}

/// Return type: the type node following the parameter list and a `:`.
fn return_type(node: Node, source: &str) -> Option<String> {
    let mut seen_params = false;
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "function_value_parameters" {
            seen_params = true;
            continue;
        }
        if seen_params
            && matches!(child.kind(), "user_type" | "nullable_type" | "function_type" | "type_reference")
        {
            return Some(node_text(child, source).to_string());
        }
        if seen_params && child.kind() == "function_body" {
            break;
        }
    }
    None
}

/// KDoc comment immediately preceding the declaration.
fn kdoc_before(node: Node, source: &str) -> Option<String> {
    let mut sibling = node.prev_sibling();
    while let Some(prev) = sibling {
        match prev.kind() {
            "multiline_comment" | "comment" | "block_comment" => {
                let text = node_text(prev, source);
                if text.starts_with("/**") {
                    let cleaned = text
                        .trim_start_matches("/**")
                        .trim_end_matches("*/")
                        .lines()
                        .map(|l| l.trim().trim_start_matches('*').trim())
                        .filter(|l| !l.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    return Some(cleaned);
                }
                return None;
            }
            "modifiers" => sibling = prev.prev_sibling(),
            _ => return None,
        }
    }
    None
}

fn value_arguments(node: Node, source: &str) -> Vec<String> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            if child.kind() == "value_arguments" {
                let mut inner = child.walk();
                return child
                    .named_children(&mut inner)
                    .map(|a| truncate_arg(node_text(a, source)))
                    .collect();
            }
            if child.kind() == "call_suffix" {
                stack.push(child);
            }
        }
    }
    Vec::new()
}

fn parse_import_header(text: &str) -> Option<ImportRecord> {
    let rest = text.trim().strip_prefix("import")?.trim();
    if rest.is_empty() {
        return None;
    }
    let (module, alias) = match rest.split_once(" as ") {
        Some((m, a)) => (m.trim().to_string(), Some(a.trim().to_string())),
        None => (rest.to_string(), None),
    };
    // `import a.b.*` imports the whole package
    if let Some(package) = module.strip_suffix(".*") {
        return Some(ImportRecord { module: package.to_string(), names: Vec::new(), alias });
    }
    // `import a.b.Name` imports one name from package a.b
    match module.rsplit_once('.') {
        Some((package, name)) => Some(ImportRecord {
            module: package.to_string(),
            names: vec![name.to_string()],
            alias,
        }),
        None => Some(ImportRecord { module, names: Vec::new(), alias }),
    }
}

// ---------------------------------------------------------------------------
// LanguageExtractor impl
// ---------------------------------------------------------------------------

impl LanguageExtractor for KotlinExtractor {
    fn language(&self) -> Language {
        Language::Kotlin
    }

    fn extract(&self, source: &str, rel_path: &str) -> Result<FileSyntax> {
        let tree = parse_source(source, Language::Kotlin)?;
        let mut walker = Walker { source, rel_path, out: FileSyntax::default() };
        walker.visit(tree.root_node(), None, None);
        Ok(walker.out)
    }

    fn detect_triggers(&self, source: &str) -> Vec<TriggerInfo> {
        let mut triggers = Vec::new();

        // Spring HTTP mapping annotations
        for annotation in HTTP_ANNOTATIONS {
            let Ok(re) = regex::Regex::new(&format!(r"@{annotation}\s*\(([^)]*)\)")) else {
                continue;
            };
            for found in re.captures_iter(source) {
                let method = annotation
                    .strip_suffix("Mapping")
                    .filter(|m| *m != "Request")
                    .map(|m| m.to_uppercase())
                    .unwrap_or_else(|| "GET".to_string());
                let path = regex::Regex::new(r#"["']([^"']+)["']"#)
                    .ok()
                    .and_then(|p| p.captures(&found[1]).map(|c| c[1].to_string()))
                    .unwrap_or_else(|| "/".to_string());

                let after = &source[found.get(0).map(|m| m.end()).unwrap_or(0)..];
                let mut window = after.len().min(200);
                while !after.is_char_boundary(window) {
                    window -= 1;
                }
                if let Some(fun) = regex::Regex::new(r"fun\s+(\w+)")
                    .ok()
                    .and_then(|f| f.captures(&after[..window]))
                {
                    let mut metadata = BTreeMap::new();
                    metadata.insert("method".to_string(), method);
                    metadata.insert("path".to_string(), path);
                    metadata.insert("annotation".to_string(), format!("@{annotation}"));
                    triggers.push(TriggerInfo {
                        function_name: fun[1].to_string(),
                        kind: TriggerKind::Http,
                        metadata,
                    });
                }
            }
        }

        // gRPC: class Foo(...) : BarServiceCoroutineImplBase() { override suspend fun ... }
        if let Ok(grpc_re) =
            regex::Regex::new(r"class\s+(\w+)\s*\([^)]*\)\s*:\s*([\w.]+)CoroutineImplBase\(\)")
        {
            for class in grpc_re.captures_iter(source) {
                let class_name = class[1].to_string();
                let service = class[2]
                    .trim_end_matches("GrpcKt.")
                    .trim_end_matches("Grpc")
                    .rsplit('.')
                    .next()
                    .unwrap_or(&class[2])
                    .to_string();

                let class_start = class.get(0).map(|m| m.end()).unwrap_or(0);
                let body = &source[class_start..];
                if let Ok(method_re) = regex::Regex::new(r"override\s+suspend\s+fun\s+(\w+)\s*\(") {
                    for method in method_re.captures_iter(body) {
                        let mut metadata = BTreeMap::new();
                        metadata.insert("service".to_string(), service.clone());
                        metadata.insert("method".to_string(), method[1].to_string());
                        metadata.insert("class".to_string(), class_name.clone());
                        triggers.push(TriggerInfo {
                            function_name: method[1].to_string(),
                            kind: TriggerKind::Grpc,
                            metadata,
                        });
                    }
                }
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
        // Package path under the conventional Kotlin source roots
        let parts: Vec<&str> = module.split('.').collect();
        if parts.is_empty() {
            return None;
        }
        let rel: PathBuf = parts.iter().collect();
        let candidates = [
            project_root.join("src/main/kotlin").join(rel.with_extension("kt")),
            project_root.join("src").join(rel.with_extension("kt")),
            project_root.join(rel.with_extension("kt")),
        ];
        candidates.into_iter().find(|c| c.is_file())
    }

    fn classify_layer(&self, rel_path: &str, decorators: &[String]) -> Layer {
        for decorator in decorators {
            if decorator.contains("RestController") || decorator.contains("Controller") {
                return Layer::Controller;
            }
            if decorator.contains("Service") {
                return Layer::Service;
            }
            if decorator.contains("Repository") {
                return Layer::Provider;
            }
        }
        let path = rel_path.to_lowercase();
        if ["controller", "api", "handler"].iter().any(|p| path.contains(p)) {
            return Layer::Controller;
        }
        if ["service", "usecase", "business"].iter().any(|p| path.contains(p)) {
            return Layer::Service;
        }
        if ["repository", "dao", "client"].iter().any(|p| path.contains(p)) {
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
            Some(ret) => format!("fun {name}({params}): {ret}"),
            None => format!("fun {name}({params})"),
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
    fn test_functions_and_suspend() {
        let src = r#"
fun plain(x: Int): Int {
    return helper(x)
}

suspend fun fetch(id: String) {
    client.get(id)
}
"#;
        let syntax = KotlinExtractor.extract(src, "a.kt").unwrap();
        assert_eq!(syntax.functions.len(), 2);
        assert_eq!(syntax.functions[0].name, "plain");
        assert!(!syntax.functions[0].is_async);
        assert_eq!(syntax.functions[1].name, "fetch");
        assert!(syntax.functions[1].is_async);

        // plain -> helper as an unqualified call
        assert!(syntax
            .calls
            .iter()
            .any(|c| c.caller == "plain" && c.callee_name == "helper" && c.callee_module.is_none()));
        // fetch -> client.get with a receiver hint
        assert!(syntax
            .calls
            .iter()
            .any(|c| c.caller == "fetch"
                && c.callee_name == "get"
                && c.callee_module.as_deref() == Some("client")));
    }

    #[test]
    fn test_class_methods() {
        let src = r#"
class UserService {
    fun create(name: String): User {
        return repository.save(name)
    }
}
"#;
        let syntax = KotlinExtractor.extract(src, "UserService.kt").unwrap();
        let f = &syntax.functions[0];
        assert_eq!(f.name, "create");
        assert!(f.is_method);
        assert_eq!(f.class_name.as_deref(), Some("UserService"));
        assert_eq!(f.parameters, vec!["name"]);
    }

    #[test]
    fn test_imports() {
        let src = "import org.springframework.web.bind.annotation.GetMapping\nimport kotlin.collections.*\nimport a.b.C as D\n";
        let syntax = KotlinExtractor.extract(src, "a.kt").unwrap();
        assert_eq!(syntax.imports.len(), 3);
        assert_eq!(syntax.imports[0].module, "org.springframework.web.bind.annotation");
        assert_eq!(syntax.imports[0].names, vec!["GetMapping"]);
        assert_eq!(syntax.imports[1].module, "kotlin.collections");
        assert!(syntax.imports[1].names.is_empty());
        assert_eq!(syntax.imports[2].alias.as_deref(), Some("D"));
    }

    #[test]
    fn test_spring_http_trigger() {
        let src = r#"
@RestController
class UserController {
    @GetMapping("/users")
    fun listUsers(): List<User> = service.findAll()
}
"#;
        let triggers = KotlinExtractor.detect_triggers(src);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].kind, TriggerKind::Http);
        assert_eq!(triggers[0].function_name, "listUsers");
        assert_eq!(triggers[0].metadata["method"], "GET");
        assert_eq!(triggers[0].metadata["path"], "/users");
    }

    #[test]
    fn test_grpc_trigger() {
        let src = r#"
class ConfigService(private val repo: Repo) : ConfigServiceGrpcKt.ConfigServiceCoroutineImplBase() {
    override suspend fun getConfig(request: ConfigRequest): ConfigResponse {
        return repo.load(request)
    }
}
"#;
        let triggers = KotlinExtractor.detect_triggers(src);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].kind, TriggerKind::Grpc);
        assert_eq!(triggers[0].function_name, "getConfig");
        assert_eq!(triggers[0].metadata["class"], "ConfigService");
    }

    #[test]
    fn test_layer_from_annotations() {
        let e = KotlinExtractor;
        assert_eq!(e.classify_layer("x/Foo.kt", &["RestController".into()]), Layer::Controller);
        assert_eq!(e.classify_layer("x/Foo.kt", &["Service".into()]), Layer::Service);
        assert_eq!(e.classify_layer("x/Foo.kt", &["Repository".into()]), Layer::Provider);
        assert_eq!(e.classify_layer("x/dao/Foo.kt", &[]), Layer::Provider);
    }
}
