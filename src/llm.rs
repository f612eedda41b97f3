//! Chat-completion and embedding client
//!
//! Every decision in the assistant is delegated to a hosted model behind the
//! [`ChatModel`] and [`Embedder`] traits. [`OpenAiClient`] talks to any
//! OpenAI-compatible endpoint and keeps a long-lived reqwest::Client for
//! connection pooling.

use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// Chat role as understood by the completion API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// JSON-schema description of a function the model is forced to call
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Plain text completion
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;

    /// Force a call to `function` and return its parsed JSON arguments
    async fn call_function(
        &self,
        messages: &[ChatMessage],
        function: &FunctionSpec,
        temperature: f32,
    ) -> Result<Value>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Single user-message completion, trimmed
pub async fn ask(model: &dyn ChatModel, prompt: &str, temperature: f32) -> Result<String> {
    let reply = model.complete(&[ChatMessage::user(prompt)], temperature).await?;
    Ok(reply.trim().to_string())
}

/// System + user completion, trimmed
pub async fn ask_with_system(
    model: &dyn ChatModel,
    system: &str,
    user: &str,
    temperature: f32,
) -> Result<String> {
    let messages = [ChatMessage::system(system), ChatMessage::user(user)];
    let reply = model.complete(&messages, temperature).await?;
    Ok(reply.trim().to_string())
}

/// Remove a surrounding markdown code fence (```sql, ```json or bare ```)
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => strip_fence_language(rest),
    };
    body.trim_end().trim_end_matches("```").trim()
}

const FENCE_LANGUAGES: &[&str] = &["sql", "sqlite", "json", "text", "plaintext"];

/// One-line fences carry the tag before the body: "```sql SELECT 1```"
fn strip_fence_language(rest: &str) -> &str {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((tag, body)) if FENCE_LANGUAGES.contains(&tag.to_lowercase().as_str()) => body,
        _ => rest,
    }
}

/// Reusable OpenAI-compatible client (connection-pooled)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        chat_model: String,
        embedding_model: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model,
            embedding_model,
        })
    }

    async fn post<T: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        if self.api_key.is_empty() {
            return Err(AssistantError::LlmError("OPENAI_API_KEY not configured".to_string()));
        }

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("LLM request to {} failed: {}", path, e);
                AssistantError::LlmError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("LLM API error response ({}): {}", status, error_text);
            return Err(AssistantError::LlmError(format!("{}: {}", status, error_text)));
        }

        response.json::<R>().await.map_err(|e| {
            error!("Failed to parse LLM response: {}", e);
            AssistantError::LlmError(format!("parse error: {}", e))
        })
    }

    async fn chat(&self, request: &CompletionRequest<'_>) -> Result<ResponseMessage> {
        debug!(model = %request.model, messages = request.messages.len(), "Calling chat completion");
        let response: CompletionResponse = self.post("/chat/completions", request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AssistantError::LlmError("No choices in completion response".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = CompletionRequest {
            model: &self.chat_model,
            messages,
            temperature,
            tools: None,
            tool_choice: None,
        };

        self.chat(&request)
            .await?
            .content
            .ok_or_else(|| AssistantError::LlmError("Empty completion content".to_string()))
    }

    async fn call_function(
        &self,
        messages: &[ChatMessage],
        function: &FunctionSpec,
        temperature: f32,
    ) -> Result<Value> {
        let request = CompletionRequest {
            model: &self.chat_model,
            messages,
            temperature,
            tools: Some(vec![ToolSpec { kind: "function", function }]),
            tool_choice: Some(ToolChoice {
                kind: "function",
                function: ToolChoiceFunction { name: &function.name },
            }),
        };

        let message = self.chat(&request).await?;
        let call = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .find(|call| call.function.name == function.name)
            .ok_or_else(|| {
                AssistantError::LlmError(format!("Model did not call {}", function.name))
            })?;

        Ok(serde_json::from_str(&call.function.arguments)?)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest { model: &self.embedding_model, input: texts };
        let mut response: EmbeddingResponse = self.post("/embeddings", &request).await?;

        if response.data.len() != texts.len() {
            return Err(AssistantError::LlmError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a FunctionSpec,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolChoiceFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
