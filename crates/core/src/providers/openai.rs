//! OpenAI-compatible provider implementations using the `async-openai` crate.
//!
//! Works against OpenAI itself or any endpoint speaking the same API
//! (local inference servers, proxies) via the base-URL override.

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    CreateEmbeddingRequestArgs, EmbeddingInput, ReasoningEffort, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;

use super::{ChatMessage, ChatResponse, EmbeddingProvider, JsonSchemaFormat, LlmProvider, Role, TokenUsage};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

fn build_client(api_key: &str, base_url: Option<&str>) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = base_url {
        config = config.with_api_base(base);
    }
    Client::with_config(config)
}

/// Map SDK errors onto the pipeline taxonomy so the retry path can
/// classify them.
fn map_error(e: OpenAIError) -> Error {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate") || lower.contains("too many requests") {
        Error::RateLimited(message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Error::Timeout(message)
    } else {
        Error::Provider(message)
    }
}

// ---------------------------------------------------------------------------
// LLM provider
// ---------------------------------------------------------------------------

/// Chat-completion provider for OpenAI-compatible endpoints.
pub struct OpenAiLlmProvider {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiLlmProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        OpenAiLlmProvider {
            client: build_client(&config.llm_api_key, config.llm_base_url.as_deref()),
            model: config.llm_model.clone(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        response_format: Option<&JsonSchemaFormat>,
        use_reasoning: bool,
    ) -> Result<ChatResponse> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            response_format: response_format.map(|format| ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: format.name.clone(),
                    schema: Some(format.schema.clone()),
                    strict: Some(true),
                },
            }),
            reasoning_effort: use_reasoning.then_some(ReasoningEffort::Medium),
            ..Default::default()
        };

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| Error::Timeout(format!("chat completion exceeded {}s", self.timeout.as_secs())))?
            .map_err(map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Embedding provider
// ---------------------------------------------------------------------------

/// Embedding provider for OpenAI-compatible endpoints.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let dimension = match config.embedding_model.as_str() {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => config.embedding_dimension,
        };
        OpenAiEmbeddingProvider {
            client: build_client(&config.embedding_api_key, config.embedding_base_url.as_deref()),
            model: config.embedding_model.clone(),
            dimension,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(map_error)?;

        let response = tokio::time::timeout(self.timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| Error::Timeout(format!("embedding exceeded {}s", self.timeout.as_secs())))?
            .map_err(map_error)?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Provider("embedding response contained no data".into()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
