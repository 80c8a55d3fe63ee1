//! OpenAI-compatible completion backend over HTTP.
//!
//! Speaks the chat-completions and audio-transcriptions APIs for both
//! OpenAI proper (bearer token, model in the body) and Azure OpenAI
//! (`api-key` header, deployment in the path).

use crate::backend::{
    CompletionBackend, CompletionOutcome, CompletionRequest, ContentItem, ContextEntry,
    ContextRole, LlmBackendConfig, LlmProvider, TokenUsage, ToolCall, TranscriptionRequest,
    decode_arguments,
};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument, warn};

/// Completion backend for OpenAI and Azure OpenAI.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: LlmBackendConfig,
}

impl OpenAiBackend {
    /// Creates a backend from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidConfig` if the endpoint or key is missing,
    /// or the HTTP client cannot be built.
    pub fn new(config: LlmBackendConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "base_url must not be empty".to_string(),
            });
        }
        if config.api_key.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "api_key must not be empty".to_string(),
            });
        }
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        endpoint_url(&self.config, &self.config.model, "chat/completions")
    }

    fn transcription_url(&self) -> String {
        endpoint_url(
            &self.config,
            &self.config.transcription_model,
            "audio/transcriptions",
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.provider {
            LlmProvider::OpenAi => builder.bearer_auth(&self.config.api_key),
            LlmProvider::AzureOpenAi => builder.header("api-key", &self.config.api_key),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<JsonValue, LlmError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let response = check_status(response).await?;
        response
            .json::<JsonValue>()
            .await
            .map_err(|e| LlmError::ResponseParseFailed {
                reason: e.to_string(),
            })
    }

    fn transport_error(&self, error: &reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout
        } else if error.is_connect() {
            LlmError::ProviderUnavailable {
                provider: self.config.provider.to_string(),
                reason: error.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    #[instrument(skip_all, fields(provider = %self.config.provider, model = %self.config.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        let body = build_chat_body(&self.config, request);
        debug!(
            entries = request.context.len(),
            tools = request.tools.len(),
            token_budget = request.token_budget,
            "sending chat completion"
        );
        let response = self.send(self.client.post(self.chat_url()).json(&body)).await?;
        parse_chat_response(&response)
    }

    #[instrument(
        skip_all,
        fields(provider = %self.config.provider, model = %self.config.transcription_model)
    )]
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<String, LlmError> {
        let part = reqwest::multipart::Part::bytes(request.audio.clone()).file_name("audio.wav");
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", request.language.clone())
            .text("temperature", request.temperature.to_string())
            .text("response_format", "json");
        if self.config.provider == LlmProvider::OpenAi {
            form = form.text("model", self.config.transcription_model.clone());
        }
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let response = self
            .send(self.client.post(self.transcription_url()).multipart(form))
            .await?;
        parse_transcription_response(&response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

fn endpoint_url(config: &LlmBackendConfig, deployment: &str, path: &str) -> String {
    let base = config.base_url.trim_end_matches('/');
    match config.provider {
        LlmProvider::OpenAi => format!("{base}/{path}"),
        LlmProvider::AzureOpenAi => format!(
            "{base}/openai/deployments/{deployment}/{path}?api-version={}",
            config.api_version
        ),
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        warn!(?retry_after_secs, "completion backend rate limited");
        return Err(LlmError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(LlmError::ProviderUnavailable {
            provider: status.to_string(),
            reason: body,
        })
    } else {
        Err(LlmError::RequestFailed {
            reason: format!("HTTP {status}: {body}"),
        })
    }
}

/// Builds the chat-completions request body.
#[must_use]
pub fn build_chat_body(config: &LlmBackendConfig, request: &CompletionRequest) -> JsonValue {
    let messages: Vec<JsonValue> = request.context.iter().map(entry_to_message).collect();
    let mut body = json!({
        "messages": messages,
        "temperature": request.sampling.temperature,
        "top_p": request.sampling.top_p,
        "max_tokens": request.sampling.max_tokens,
    });

    if config.provider == LlmProvider::OpenAi {
        body["model"] = json!(config.model);
    }
    if !request.tools.is_empty() {
        let tools: Vec<JsonValue> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = JsonValue::Array(tools);
        body["tool_choice"] = json!("auto");
    }
    body
}

fn entry_to_message(entry: &ContextEntry) -> JsonValue {
    match entry.role {
        ContextRole::System => json!({ "role": "system", "content": entry.text() }),
        ContextRole::User if entry.has_image() => {
            let parts: Vec<JsonValue> = entry
                .content
                .iter()
                .map(|item| match item {
                    ContentItem::Text { text } => json!({ "type": "text", "text": text }),
                    ContentItem::Image { url } => {
                        json!({ "type": "image_url", "image_url": { "url": url } })
                    }
                })
                .collect();
            json!({ "role": "user", "content": parts })
        }
        ContextRole::User => json!({ "role": "user", "content": entry.text() }),
        ContextRole::Assistant if !entry.tool_calls.is_empty() => {
            let calls: Vec<JsonValue> = entry
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": JsonValue::Null, "tool_calls": calls })
        }
        ContextRole::Assistant => json!({ "role": "assistant", "content": entry.text() }),
        ContextRole::Tool => json!({
            "role": "tool",
            "tool_call_id": entry.tool_call_id,
            "content": entry.text(),
        }),
    }
}

/// Parses a chat-completions response body.
///
/// Tool-call arguments that do not decode to a JSON object are passed on
/// as the raw string, so the dispatcher can reject them.
///
/// # Errors
///
/// Returns `LlmError::ResponseParseFailed` if the body has no choices.
pub fn parse_chat_response(body: &JsonValue) -> Result<CompletionOutcome, LlmError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::ResponseParseFailed {
            reason: "response has no choices".to_string(),
        })?;

    let usage = TokenUsage {
        input_tokens: usage_field(body, "prompt_tokens"),
        output_tokens: usage_field(body, "completion_tokens"),
    };

    let calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(JsonValue::as_array)
        .map(|calls| calls.iter().map(parse_tool_call).collect())
        .unwrap_or_default();

    if calls.is_empty() {
        let content = message
            .get("content")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(CompletionOutcome::Final { content, usage })
    } else {
        Ok(CompletionOutcome::ToolRequested { calls, usage })
    }
}

fn parse_tool_call(raw: &JsonValue) -> ToolCall {
    let id = raw["id"].as_str().unwrap_or_default();
    let name = raw["function"]["name"].as_str().unwrap_or_default();
    let arguments = raw["function"]["arguments"].as_str().unwrap_or_default();
    let arguments = match decode_arguments(arguments) {
        Ok(map) => JsonValue::Object(map),
        Err(reason) => {
            warn!(tool = name, %reason, "tool call arguments are not a JSON object");
            JsonValue::String(arguments.to_string())
        }
    };
    ToolCall::new(id, name, arguments)
}

fn usage_field(body: &JsonValue, field: &str) -> u32 {
    body.get("usage")
        .and_then(|u| u.get(field))
        .and_then(JsonValue::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Parses an audio-transcriptions response body.
///
/// # Errors
///
/// Returns `LlmError::ResponseParseFailed` if the body has no text field.
pub fn parse_transcription_response(body: &JsonValue) -> Result<String, LlmError> {
    body.get("text")
        .and_then(JsonValue::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| LlmError::ResponseParseFailed {
            reason: "transcription response has no text".to_string(),
        })
}
