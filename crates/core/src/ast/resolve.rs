//! Cross-file call resolution.
//!
//! Given every file's function definitions and imports, promotes raw call
//! edges to resolved definition sites through a confidence ladder: module
//! hint via import rules, same-file definition, import search, and finally
//! a unique global name match. Anything else stays unresolved (external or
//! dynamic). Resolution is deterministic for stable inputs.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::{extractor_for, LanguageExtractor};
use crate::types::{CallEdge, FunctionRecord, ImportRecord, Language};

/// Resolution confidence, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// A call edge promoted to a concrete callee definition site.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub caller_id: String,
    pub callee_id: String,
    pub line: usize,
    pub arguments: Vec<String>,
    pub confidence: Confidence,
}

/// Resolver over the whole project's extraction output.
pub struct CallResolver<'a> {
    project_root: &'a Path,
    functions: &'a HashMap<String, Vec<FunctionRecord>>,
    imports: &'a HashMap<String, Vec<ImportRecord>>,
    /// name -> [(rel_path, def)] across all files
    index: HashMap<&'a str, Vec<(&'a str, &'a FunctionRecord)>>,
}

impl<'a> CallResolver<'a> {
    pub fn new(
        project_root: &'a Path,
        functions: &'a HashMap<String, Vec<FunctionRecord>>,
        imports: &'a HashMap<String, Vec<ImportRecord>>,
    ) -> Self {
        let mut index: HashMap<&str, Vec<(&str, &FunctionRecord)>> = HashMap::new();
        for (rel_path, defs) in functions {
            for def in defs {
                index.entry(def.name.as_str()).or_default().push((rel_path.as_str(), def));
            }
        }
        debug!(names = index.len(), "Built global function index");
        CallResolver { project_root, functions, imports, index }
    }

    /// Resolve all calls from one file.
    pub fn resolve_file(
        &self,
        rel_path: &str,
        calls: &[CallEdge],
        language: Language,
    ) -> Vec<ResolvedCall> {
        let extractor = extractor_for(language);
        calls
            .iter()
            .filter_map(|call| self.resolve_call(rel_path, call, extractor.as_ref()))
            .collect()
    }

    /// Resolve one call through the confidence ladder, or None if the
    /// callee is external or dynamic.
    pub fn resolve_call(
        &self,
        caller_file: &str,
        call: &CallEdge,
        extractor: &dyn LanguageExtractor,
    ) -> Option<ResolvedCall> {
        let caller_id = self.caller_id(caller_file, call);

        // 1. Module hint: resolve the module via the language's import
        //    rules, then look for the callee in that file.
        if let Some(module) = &call.callee_module {
            if let Some(target) = self.resolve_module(module, caller_file, extractor) {
                if let Some(callee_id) = self.find_in_file(&target, &call.callee_name) {
                    return Some(self.resolved(caller_id, callee_id, call, Confidence::High));
                }
            }

            // 1b. Filename-stem match on the hint, excluding the caller file
            let module_lower = module.to_lowercase();
            let matches: Vec<&(&str, &FunctionRecord)> = self
                .index
                .get(call.callee_name.as_str())
                .map(|candidates| {
                    candidates
                        .iter()
                        .filter(|(file, _)| {
                            if *file == caller_file {
                                return false;
                            }
                            let stem = Path::new(file)
                                .file_stem()
                                .map(|s| s.to_string_lossy().to_lowercase())
                                .unwrap_or_default();
                            !stem.is_empty()
                                && (module_lower.contains(&stem) || stem.contains(&module_lower))
                        })
                        .collect()
                })
                .unwrap_or_default();
            if let [single] = matches.as_slice() {
                let callee_id = single.1.def_id();
                return Some(self.resolved(caller_id, callee_id, call, Confidence::Medium));
            }
        }

        // 2. Same-file definition, only when no module hint was given
        if call.callee_module.is_none() {
            if let Some(callee_id) = self.find_in_file(caller_file, &call.callee_name) {
                return Some(self.resolved(caller_id, callee_id, call, Confidence::High));
            }
        }

        // 3. Search the caller's imports for the name (or a whole-module /
        //    wildcard import)
        for import in self.imports.get(caller_file).map(|v| v.as_slice()).unwrap_or_default() {
            if !import.names.is_empty() && !import.names.contains(&call.callee_name) {
                continue;
            }
            if let Some(target) = self.resolve_module(&import.module, caller_file, extractor) {
                if let Some(callee_id) = self.find_in_file(&target, &call.callee_name) {
                    return Some(self.resolved(caller_id, callee_id, call, Confidence::Medium));
                }
            }
        }

        // 4. Unique global definition
        if let Some([(_, single)]) =
            self.index.get(call.callee_name.as_str()).map(|v| v.as_slice())
        {
            return Some(self.resolved(caller_id, single.def_id(), call, Confidence::Low));
        }

        // 5. Unresolved: external library or dynamic dispatch
        debug!(
            callee = call.callee_name.as_str(),
            module = call.callee_module.as_deref().unwrap_or(""),
            from = caller_file,
            "Call left unresolved"
        );
        None
    }

    fn resolved(
        &self,
        caller_id: String,
        callee_id: String,
        call: &CallEdge,
        confidence: Confidence,
    ) -> ResolvedCall {
        ResolvedCall {
            caller_id,
            callee_id,
            line: call.line,
            arguments: call.arguments.clone(),
            confidence,
        }
    }

    /// Caller identity anchored at the definition line when known.
    fn caller_id(&self, caller_file: &str, call: &CallEdge) -> String {
        let def_line = self
            .functions
            .get(caller_file)
            .and_then(|defs| defs.iter().find(|d| d.name == call.caller))
            .map(|d| d.line_start)
            .unwrap_or(call.line);
        format!("{caller_file}::{}::{def_line}", call.caller)
    }

    fn find_in_file(&self, rel_path: &str, name: &str) -> Option<String> {
        self.functions
            .get(rel_path)?
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.def_id())
    }

    /// Resolve a module string to a project-relative file path.
    fn resolve_module(
        &self,
        module: &str,
        caller_file: &str,
        extractor: &dyn LanguageExtractor,
    ) -> Option<String> {
        let current = self.project_root.join(caller_file);
        let resolved = extractor.resolve_import(module, &current, self.project_root)?;
        let rel = resolved
            .strip_prefix(self.project_root)
            .map(|p| p.to_path_buf())
            .unwrap_or(resolved);
        Some(rel.to_string_lossy().replace('\\', "/"))
    }
}

/// Resolution statistics for logging and status output.
pub fn resolution_stats(resolved: &[ResolvedCall]) -> HashMap<&'static str, usize> {
    let mut stats = HashMap::new();
    stats.insert("total", resolved.len());
    stats.insert("high", resolved.iter().filter(|c| c.confidence == Confidence::High).count());
    stats.insert("medium", resolved.iter().filter(|c| c.confidence == Confidence::Medium).count());
    stats.insert("low", resolved.iter().filter(|c| c.confidence == Confidence::Low).count());
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FileSyntax;

    fn extract_to_maps(
        files: &[(&str, &str)],
        root: &Path,
    ) -> (HashMap<String, Vec<FunctionRecord>>, HashMap<String, Vec<ImportRecord>>, HashMap<String, FileSyntax>)
    {
        let mut functions = HashMap::new();
        let mut imports = HashMap::new();
        let mut syntaxes = HashMap::new();
        for (rel, content) in files {
            std::fs::create_dir_all(root.join(rel).parent().unwrap()).unwrap();
            std::fs::write(root.join(rel), content).unwrap();
            let syntax = extractor_for(Language::Python).extract(content, rel).unwrap();
            functions.insert(rel.to_string(), syntax.functions.clone());
            imports.insert(rel.to_string(), syntax.imports.clone());
            syntaxes.insert(rel.to_string(), syntax);
        }
        (functions, imports, syntaxes)
    }

    #[test]
    fn test_import_resolution_cross_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("a.py", "from b import g\n\ndef caller():\n    return g(1)\n"),
            ("b.py", "def g(x):\n    return x\n"),
        ];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].callee_id.starts_with("b.py::g::"));
        assert!(matches!(resolved[0].confidence, Confidence::High | Confidence::Medium));
    }

    #[test]
    fn test_same_file_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let files = [("a.py", "def helper(x):\n    return x\n\ndef caller():\n    return helper(2)\n")];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].confidence, Confidence::High);
        assert!(resolved[0].callee_id.starts_with("a.py::helper::"));
        assert!(resolved[0].caller_id.starts_with("a.py::caller::"));
    }

    #[test]
    fn test_unique_global_low_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("a.py", "def caller():\n    return lonely(1)\n"),
            ("lib/other.py", "def lonely(x):\n    return x\n"),
        ];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].confidence, Confidence::Low);
        assert!(resolved[0].callee_id.starts_with("lib/other.py::lonely::"));
    }

    #[test]
    fn test_external_call_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let files = [("a.py", "import requests\n\ndef caller():\n    return requests.get('http://x')\n")];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_module_hint_stem_match() {
        let dir = tempfile::tempdir().unwrap();
        // helpers.validate(x): the module does not resolve as an import
        // (module object attribute), but the stem matches helpers.py
        let files = [
            ("a.py", "import helpers\n\ndef caller(x):\n    return helpers.validate(x)\n"),
            ("helpers.py", "def validate(x):\n    return True\n"),
        ];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].callee_id.starts_with("helpers.py::validate::"));
    }

    #[test]
    fn test_ambiguous_name_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("a.py", "def caller():\n    return dup(1)\n"),
            ("x.py", "def dup(v):\n    return v\n"),
            ("y.py", "def dup(v):\n    return v\n"),
        ];
        let (functions, imports, syntaxes) = extract_to_maps(&files, dir.path());
        let resolver = CallResolver::new(dir.path(), &functions, &imports);

        let resolved = resolver.resolve_file("a.py", &syntaxes["a.py"].calls, Language::Python);
        assert!(resolved.is_empty());
    }
}
