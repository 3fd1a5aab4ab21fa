//! Entry-point trigger detection and architectural layer assignment.
//!
//! Detection itself is language-specific and lives with the AST extractors;
//! this module fans out to them, lets callers register extra HTTP framework
//! patterns at runtime, and applies the layer hierarchy
//! (trigger, controller, service, provider, external; first match wins).

use regex::Regex;
use std::collections::BTreeMap;

use crate::ast::extractor_for;
use crate::types::{CallEdge, FunctionRecord, Language, Layer, TriggerInfo, TriggerKind};

// ---------------------------------------------------------------------------
// Known third-party namespaces per language
// ---------------------------------------------------------------------------

/// Call receivers that mark a function as talking to external services.
fn external_namespaces(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &[
            "requests", "httpx", "aiohttp", "firebase_admin", "boto3", "google.cloud",
            "stripe", "sendgrid", "twilio", "pymongo", "psycopg2", "redis",
        ],
        Language::JavaScript | Language::TypeScript => &[
            "axios", "fetch", "firebase", "aws-sdk", "stripe", "mongoose", "pg", "redis",
        ],
        Language::Go => &["http.Client", "grpc", "firebase", "aws", "stripe", "mongo", "sql", "redis"],
        Language::Kotlin => &[
            "RestTemplate", "WebClient", "FirebaseApp", "AmazonS3", "Stripe", "MongoTemplate",
            "JdbcTemplate",
        ],
        _ => &[],
    }
}

/// Whether a call's module hint points into a known third-party namespace.
pub fn is_external_call(language: Language, call: &CallEdge) -> bool {
    let Some(module) = &call.callee_module else {
        return false;
    };
    external_namespaces(language)
        .iter()
        .any(|ns| module == ns || module.starts_with(&format!("{ns}.")))
}

// ---------------------------------------------------------------------------
// Trigger detection with a registration hook
// ---------------------------------------------------------------------------

/// A runtime-registered HTTP framework pattern. The regex must expose two
/// capture groups: the HTTP method-ish token and the route path.
pub struct HttpPattern {
    pub language: Language,
    pub pattern: Regex,
}

/// Detects entry-point triggers across languages. The built-in detectors
/// live with the language extractors; additional HTTP frameworks can be
/// registered here without touching extractor code.
#[derive(Default)]
pub struct TriggerDetector {
    extra_http: Vec<HttpPattern>,
}

impl TriggerDetector {
    pub fn new() -> Self {
        TriggerDetector::default()
    }

    /// Register an additional HTTP route pattern for a language.
    pub fn register_http_pattern(&mut self, language: Language, pattern: Regex) {
        self.extra_http.push(HttpPattern { language, pattern });
    }

    /// Detect all triggers in one file.
    pub fn detect(&self, source: &str, language: Language) -> Vec<TriggerInfo> {
        let mut triggers = extractor_for(language).detect_triggers(source);

        for extra in self.extra_http.iter().filter(|p| p.language == language) {
            for found in extra.pattern.captures_iter(source) {
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "method".to_string(),
                    found.get(1).map(|m| m.as_str().to_uppercase()).unwrap_or_else(|| "GET".into()),
                );
                metadata.insert(
                    "path".to_string(),
                    found.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| "/".into()),
                );
                triggers.push(TriggerInfo {
                    function_name: found
                        .get(3)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| "anonymous".into()),
                    kind: TriggerKind::Http,
                    metadata,
                });
            }
        }

        triggers
    }
}

/// Human-readable one-liner for a trigger.
pub fn format_trigger(trigger: &TriggerInfo) -> String {
    let get = |key: &str, default: &str| {
        trigger.metadata.get(key).cloned().unwrap_or_else(|| default.to_string())
    };
    match trigger.kind {
        TriggerKind::Http => format!(
            "HTTP {} {} → {}()",
            get("method", "GET"),
            get("path", "/"),
            trigger.function_name
        ),
        TriggerKind::Grpc => format!(
            "gRPC {}/{} → {}()",
            get("service", "unknown"),
            get("method", "unknown"),
            trigger.function_name
        ),
        TriggerKind::Kafka => {
            format!("Kafka consumer '{}' → {}()", get("topic", "unknown"), trigger.function_name)
        }
        TriggerKind::Scheduled => {
            format!("Scheduled ({}) → {}()", get("schedule", "unknown"), trigger.function_name)
        }
        TriggerKind::Websocket => {
            format!("WebSocket {} → {}()", get("path", "/"), trigger.function_name)
        }
        TriggerKind::Graphql => format!("GraphQL resolver → {}()", trigger.function_name),
    }
}

// ---------------------------------------------------------------------------
// Layer classification
// ---------------------------------------------------------------------------

/// Assign the architectural layer for a function. Pure in its inputs:
/// trigger presence wins outright, then the language extractor's path and
/// decorator heuristics, and a resolved call into a third-party namespace
/// raises the result to external when the heuristics said nothing stronger.
pub fn classify_layer(
    function: &FunctionRecord,
    language: Language,
    has_trigger: bool,
    calls: &[CallEdge],
) -> Layer {
    if has_trigger {
        return Layer::Trigger;
    }

    let heuristic = extractor_for(language).classify_layer(&function.rel_path, &function.decorators);
    if heuristic != Layer::Service {
        return heuristic;
    }

    let makes_external_calls = calls
        .iter()
        .filter(|c| c.caller == function.name)
        .any(|c| is_external_call(language, c));
    if makes_external_calls {
        return Layer::External;
    }

    heuristic
}

/// Description of what a layer means, for status output.
pub fn layer_description(layer: Layer) -> &'static str {
    match layer {
        Layer::Trigger => "Entry point that triggers execution (HTTP, queue, schedule)",
        Layer::Controller => "Request handler coordinating inputs and responses",
        Layer::Service => "Business logic and domain operations",
        Layer::Provider => "Data access and external service integration",
        Layer::External => "Direct third-party API call",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, rel_path: &str) -> FunctionRecord {
        FunctionRecord {
            name: name.into(),
            rel_path: rel_path.into(),
            line_start: 1,
            line_end: 2,
            source: String::new(),
            parameters: Vec::new(),
            return_type: None,
            is_async: false,
            is_method: false,
            class_name: None,
            decorators: Vec::new(),
            docstring: None,
        }
    }

    fn call(caller: &str, module: Option<&str>, callee: &str) -> CallEdge {
        CallEdge {
            caller: caller.into(),
            callee_name: callee.into(),
            callee_module: module.map(|m| m.into()),
            line: 1,
            arguments: Vec::new(),
        }
    }

    #[test]
    fn test_trigger_wins() {
        let f = function("handler", "app/services/x.py");
        assert_eq!(classify_layer(&f, Language::Python, true, &[]), Layer::Trigger);
    }

    #[test]
    fn test_path_heuristics() {
        let f = function("list_users", "app/api/users.py");
        assert_eq!(classify_layer(&f, Language::Python, false, &[]), Layer::Controller);

        let f = function("save", "app/repository/users.py");
        assert_eq!(classify_layer(&f, Language::Python, false, &[]), Layer::Provider);
    }

    #[test]
    fn test_external_call_raises() {
        let f = function("notify", "app/misc.py");
        let calls = vec![call("notify", Some("requests"), "post")];
        assert_eq!(classify_layer(&f, Language::Python, false, &calls), Layer::External);

        // Other functions' calls do not affect this one
        let other = vec![call("someone_else", Some("requests"), "post")];
        assert_eq!(classify_layer(&f, Language::Python, false, &other), Layer::Service);
    }

    #[test]
    fn test_is_external_call() {
        assert!(is_external_call(Language::Python, &call("f", Some("requests"), "get")));
        assert!(is_external_call(Language::Python, &call("f", Some("google.cloud.storage"), "upload")));
        assert!(!is_external_call(Language::Python, &call("f", Some("myapp.db"), "get")));
        assert!(!is_external_call(Language::Python, &call("f", None, "get")));
    }

    #[test]
    fn test_registered_pattern() {
        let mut detector = TriggerDetector::new();
        detector.register_http_pattern(
            Language::Python,
            Regex::new(r#"@custom\.(get|post)\("([^"]+)"\)\s*\ndef\s+(\w+)"#).unwrap(),
        );

        let source = "@custom.get(\"/ping\")\ndef ping():\n    return 'pong'\n";
        let triggers = detector.detect(source, Language::Python);
        assert!(triggers.iter().any(|t| {
            t.kind == TriggerKind::Http
                && t.function_name == "ping"
                && t.metadata["path"] == "/ping"
        }));
    }

    #[test]
    fn test_format_trigger() {
        let mut metadata = BTreeMap::new();
        metadata.insert("method".to_string(), "GET".to_string());
        metadata.insert("path".to_string(), "/users".to_string());
        let t = TriggerInfo {
            function_name: "list_users".into(),
            kind: TriggerKind::Http,
            metadata,
        };
        assert_eq!(format_trigger(&t), "HTTP GET /users → list_users()");
    }
}
