//! Shared test harness: scripted LLM, deterministic embedder, and fixture
//! project builders used by the pipeline tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use codeatlas_core::error::{Error, Result};
use codeatlas_core::providers::{
    ChatMessage, ChatResponse, EmbeddingProvider, JsonSchemaFormat, LlmProvider,
};

// ---------------------------------------------------------------------------
// Scripted LLM
// ---------------------------------------------------------------------------

/// Scripted chat provider. Project-analysis prompts pop queued responses;
/// chunk and function prompts get valid default JSON. Prompts containing a
/// registered failure marker raise a provider error instead.
pub struct MockLlm {
    analysis_responses: Mutex<Vec<serde_json::Value>>,
    fail_markers: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub concurrent: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        MockLlm {
            analysis_responses: Mutex::new(Vec::new()),
            fail_markers: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Queue a project-analysis response (served in FIFO order).
    pub fn push_analysis_response(&self, response: serde_json::Value) {
        self.analysis_responses.lock().unwrap().push(response);
    }

    /// Any prompt containing `marker` fails with a provider error.
    pub fn fail_on(&self, marker: &str) {
        self.fail_markers.lock().unwrap().push(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_markers.lock().unwrap().clear();
    }

    /// Number of prompts seen that contain the given substring.
    pub fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts.lock().unwrap().iter().filter(|p| p.contains(needle)).count()
    }
}

/// A converged analysis response: every field at the given confidence.
pub fn analysis_response(confidence: i64, next_path: Vec<&str>) -> serde_json::Value {
    json!({
        "project_description": "Inventory management web service exposing a REST API",
        "project_description_confidence": confidence,
        "languages": ["Python"],
        "languages_confidence": confidence,
        "frameworks": ["FastAPI"],
        "frameworks_confidence": confidence,
        "modules": ["api", "storage"],
        "modules_confidence": confidence,
        "entry_points": ["src/app.py"],
        "entry_points_confidence": confidence,
        "architecture": "web-app",
        "architecture_confidence": confidence,
        "next_path": next_path,
        "reasoning": "manifest and entry point are explicit"
    })
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _response_format: Option<&JsonSchemaFormat>,
        _use_reasoning: bool,
    ) -> Result<ChatResponse> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());

        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        for marker in self.fail_markers.lock().unwrap().iter() {
            if prompt.contains(marker.as_str()) {
                return Err(Error::Provider(format!("injected failure for {marker}")));
            }
        }

        let content = if prompt.contains("NEW FILES TO ANALYZE") {
            let mut queued = self.analysis_responses.lock().unwrap();
            if queued.is_empty() {
                analysis_response(95, vec![]).to_string()
            } else {
                queued.remove(0).to_string()
            }
        } else if prompt.contains("FUNCTION:") {
            json!({
                "description": "does a thing",
                "purpose": "testing",
                "input_description": "a value",
                "output_description": "a value",
                "side_effects": [],
                "complexity": "low"
            })
            .to_string()
        } else {
            json!({
                "purpose": "test analysis",
                "dependencies": [],
                "exported_symbols": [],
                "key_functions": [],
                "architectural_notes": ""
            })
            .to_string()
        };

        Ok(ChatResponse { content, model: "mock".into(), usage: None })
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Deterministic embedder
// ---------------------------------------------------------------------------

pub const EMBED_DIM: usize = 32;

/// Hash-projected bag-of-words embedder: similar texts get similar vectors,
/// fully deterministic, no network.
pub struct MockEmbedder {
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        MockEmbedder { calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIM];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        v[(hasher.finish() as usize) % EMBED_DIM] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(embed_text(text))
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

// ---------------------------------------------------------------------------
// Fixture projects
// ---------------------------------------------------------------------------

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A small Python web-service fixture with a distinctive README.
pub fn write_fixture(root: &Path) {
    write_file(
        root,
        "README.md",
        "# Inventory Service\n\nPython web service with FastAPI managing warehouse \
         inventory, stock levels, and reorder thresholds for distribution centers.\n",
    );
    write_file(
        root,
        "src/app.py",
        "from fastapi import FastAPI\nfrom storage import load_items\n\napp = FastAPI()\n\n\
         @app.get(\"/items\")\ndef list_items():\n    return load_items()\n",
    );
    write_file(
        root,
        "src/storage.py",
        "def load_items():\n    return []\n\n\ndef save_item(item):\n    return item\n",
    );
    write_file(
        root,
        "src/util.py",
        "def normalize(value):\n    return value.strip().lower()\n",
    );
}
