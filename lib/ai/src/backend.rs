//! Completion backend abstraction.
//!
//! Provides a unified interface for language-model providers: one call that
//! turns an ordered context into either a final answer or a tool-call
//! directive, and one call that transcribes audio.

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// OpenAI API (or any OpenAI-compatible endpoint).
    OpenAi,
    /// Azure OpenAI deployment.
    AzureOpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => f.write_str("open_ai"),
            Self::AzureOpenAi => f.write_str("azure_open_ai"),
        }
    }
}

/// Configuration for an LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBackendConfig {
    /// The provider type.
    pub provider: LlmProvider,
    /// Base URL for the API (Azure: the resource endpoint).
    pub base_url: String,
    /// API key.
    pub api_key: String,
    /// Chat model (Azure: the completion deployment name).
    pub model: String,
    /// Transcription model (Azure: the speech-to-text deployment name).
    pub transcription_model: String,
    /// API version query parameter, required by Azure.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

impl LlmBackendConfig {
    /// Creates an OpenAI backend configuration.
    #[must_use]
    pub fn open_ai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            transcription_model: "whisper-1".to_string(),
            api_version: default_api_version(),
        }
    }

    /// Creates an Azure OpenAI backend configuration.
    #[must_use]
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        transcription_deployment: impl Into<String>,
    ) -> Self {
        Self {
            provider: LlmProvider::AzureOpenAi,
            base_url: endpoint.into(),
            api_key: api_key.into(),
            model: deployment.into(),
            transcription_model: transcription_deployment.into(),
            api_version: default_api_version(),
        }
    }
}

/// The role a context entry is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    /// System instructions.
    System,
    /// User/human turn.
    User,
    /// Assistant/AI turn.
    Assistant,
    /// Output of a tool call.
    Tool,
}

/// One content item of a context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text { text: String },
    /// An image, referenced by URL or `data:` URI.
    Image { url: String },
}

impl ContentItem {
    /// Creates a text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an image item.
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image { url: url.into() }
    }
}

/// A tool call requested by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call identifier.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// Arguments for the tool, as decoded JSON.
    pub arguments: JsonValue,
}

impl ToolCall {
    /// Creates a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the ordered context presented to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Who the entry is attributed to.
    pub role: ContextRole,
    /// Content items, consumed jointly by the model.
    pub content: Vec<ContentItem>,
    /// Tool calls recorded on an assistant entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this tool entry answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The tool that produced this tool entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ContextEntry {
    fn new(role: ContextRole, content: Vec<ContentItem>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Creates a system entry.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ContextRole::System, vec![ContentItem::text(text)])
    }

    /// Creates a text-only user entry.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ContextRole::User, vec![ContentItem::text(text)])
    }

    /// Creates a user entry from several content items.
    #[must_use]
    pub fn user_items(items: Vec<ContentItem>) -> Self {
        Self::new(ContextRole::User, items)
    }

    /// Creates an assistant entry.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ContextRole::Assistant, vec![ContentItem::text(text)])
    }

    /// Creates the assistant entry that records a round of tool calls.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        let mut entry = Self::new(ContextRole::Assistant, Vec::new());
        entry.tool_calls = calls;
        entry
    }

    /// Creates a tool entry carrying a tool's string result.
    #[must_use]
    pub fn tool_result(call: &ToolCall, output: impl Into<String>) -> Self {
        let mut entry = Self::new(ContextRole::Tool, vec![ContentItem::text(output)]);
        entry.tool_call_id = Some(call.id.clone());
        entry.tool_name = Some(call.name.clone());
        entry
    }

    /// Returns the concatenated text items of this entry.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Returns true if any content item is an image.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|item| matches!(item, ContentItem::Image { .. }))
    }
}

/// A tool advertised to the backend as callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: JsonValue,
}

/// Sampling parameters for one call kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Temperature for sampling (0.0 - 2.0).
    pub temperature: f32,
    /// Nucleus sampling factor.
    pub top_p: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl SamplingConfig {
    /// Creates a sampling configuration.
    #[must_use]
    pub const fn new(temperature: f32, top_p: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            top_p,
            max_tokens,
        }
    }
}

/// A request to the completion backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Ordered context entries.
    pub context: Vec<ContextEntry>,
    /// Tools the backend may call.
    pub tools: Vec<ToolSpec>,
    /// Sampling parameters.
    pub sampling: SamplingConfig,
    /// Token ceiling the context was assembled under.
    ///
    /// Advisory: `context` already fits it, and it is not sent on the wire.
    /// Output length is bounded by `sampling.max_tokens`.
    pub token_budget: u32,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Adds another usage record to this one.
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// What the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Natural-language content; terminal.
    Final { content: String, usage: TokenUsage },
    /// The model wants tools invoked before it can answer.
    ToolRequested {
        calls: Vec<ToolCall>,
        usage: TokenUsage,
    },
}

/// A request to transcribe audio to text.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    /// Raw audio bytes.
    pub audio: Vec<u8>,
    /// ISO-639-1 language hint.
    pub language: String,
    /// Optional style prompt.
    pub prompt: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Trait for completion backends.
///
/// This trait defines the interface that all LLM providers must implement.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Completes the given context.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome, LlmError>;

    /// Transcribes audio to text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, LlmError>;

    /// Returns the model name.
    fn model(&self) -> &str;
}

/// Decodes tool-call arguments into a JSON object.
///
/// Backends send arguments as a JSON string; an empty string means no
/// arguments.
///
/// # Errors
///
/// Returns the decoding failure reason.
pub fn decode_arguments(raw: &str) -> Result<Map<String, JsonValue>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}
