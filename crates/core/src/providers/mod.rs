//! Provider-agnostic interfaces for LLM analysis and embedding generation.
//!
//! The engines only see these traits; the shipped implementation in
//! [`openai`] speaks to any OpenAI-compatible endpoint. Keeping the seam
//! here means a different vendor (or a mock in tests) slots in without
//! touching pipeline code.

pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Messages and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Request that the response conform to a named JSON schema.
#[derive(Debug, Clone)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion. When `response_format` is given the
    /// returned content must be JSON conforming to that schema (callers may
    /// still attempt fenced-block extraction on parse failure).
    /// `use_reasoning` opts slow paths (project analysis) into extended
    /// reasoning where the backing model supports it.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        response_format: Option<&JsonSchemaFormat>,
        use_reasoning: bool,
    ) -> Result<ChatResponse>;

    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a text into the provider's fixed-dimension vector space.
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Build the configured provider pair with the given per-call deadline.
pub fn build_providers(
    config: &ProviderConfig,
    timeout: Duration,
) -> Result<(Arc<dyn LlmProvider>, Arc<dyn EmbeddingProvider>)> {
    if config.llm_api_key.is_empty() {
        return Err(Error::Config(
            "no LLM API key configured (set LLM_API_KEY or OPENAI_API_KEY)".into(),
        ));
    }
    let llm = Arc::new(openai::OpenAiLlmProvider::new(config).with_timeout(timeout));
    let embedder = Arc::new(openai::OpenAiEmbeddingProvider::new(config).with_timeout(timeout));
    Ok((llm, embedder))
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse LLM output as JSON, tolerating a fenced ```json block around it.
pub fn extract_json(content: &str) -> Result<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Fenced-block fallback: take the first ```...``` body
    if let Some(open) = trimmed.find("```") {
        let body_start = trimmed[open + 3..]
            .find('\n')
            .map(|n| open + 3 + n + 1)
            .unwrap_or(open + 3);
        if let Some(close) = trimmed[body_start..].find("```") {
            let body = trimmed[body_start..body_start + close].trim();
            if let Ok(value) = serde_json::from_str(body) {
                return Ok(value);
            }
        }
    }

    Err(Error::InvalidResponse(format!(
        "response is not valid JSON: {}",
        &trimmed[..trimmed.len().min(200)]
    )))
}
