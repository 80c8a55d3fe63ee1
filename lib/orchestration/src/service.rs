//! The orchestration service.
//!
//! Public entry point for every request kind. Each operation validates its
//! inputs before any external call, serializes on the session id, and
//! bounds every store, normalizer, backend and tool call by a timeout.

use crate::config::OrchestrationConfig;
use crate::error::{OrchestrationError, from_context, from_dispatch, from_media, from_store};
use crate::lock::SessionLocks;
use multichat_ai::{
    CompletionBackend, CompletionDispatcher, ContextEntry, DispatchConfig, SamplingConfig,
    ToolRegistry, ToolSelection, TranscriptionRequest,
};
use multichat_conversation::{
    ContextBuilder, MediaNormalizer, Message, Modality, NewTurn, Session, SessionError,
    SessionStore, TokenBudgetManager,
};
use multichat_core::{RequestId, Result, SessionId};
use rootcause::Report;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// External collaborators the service is wired to.
#[derive(Clone)]
pub struct Collaborators {
    /// Session and message storage.
    pub store: Arc<dyn SessionStore>,
    /// Image normalization.
    pub normalizer: Arc<dyn MediaNormalizer>,
    /// Completion and transcription backend.
    pub backend: Arc<dyn CompletionBackend>,
    /// Tools the backend may call.
    pub tools: Arc<ToolRegistry>,
}

/// Ties sessions, context assembly and dispatch together.
pub struct OrchestrationService {
    config: OrchestrationConfig,
    store: Arc<dyn SessionStore>,
    normalizer: Arc<dyn MediaNormalizer>,
    dispatcher: CompletionDispatcher,
    context: ContextBuilder,
    locks: SessionLocks,
}

impl OrchestrationService {
    /// Creates the service.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError::Validation` if a token budget in the
    /// configuration is zero.
    pub fn new(
        config: OrchestrationConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestrationError> {
        if config.max_conversation_tokens == 0 {
            let error =
                OrchestrationError::validation("max_conversation_tokens", "must be positive");
            return Err(error.into());
        }
        if config.summary_budget_tokens == 0 {
            let error = OrchestrationError::validation("summary_budget_tokens", "must be positive");
            return Err(error.into());
        }

        let dispatcher = CompletionDispatcher::new(
            collaborators.backend,
            collaborators.tools,
            DispatchConfig {
                max_tool_rounds: config.max_tool_rounds,
                backend_timeout: config.timeouts.backend(),
                tool_timeout: config.timeouts.tool(),
            },
        );
        let context = ContextBuilder::new(
            config.system_prompt.clone(),
            TokenBudgetManager::new(config.max_conversation_tokens, config.image_token_estimate),
        );

        Ok(Self {
            config,
            store: collaborators.store,
            normalizer: collaborators.normalizer,
            dispatcher,
            context,
            locks: SessionLocks::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Returns the registered tools.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    /// Creates a session, with a generated ID unless one is given.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty or already used ID.
    #[instrument(skip(self))]
    pub async fn create_session(&self, id: Option<&str>) -> Result<Session, OrchestrationError> {
        let id = id.map(parse_session_id).transpose()?;
        let session = self.store_call(self.store.create(id)).await?;
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Gets a session.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the session does not exist.
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: &str) -> Result<Session, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        self.store_call(self.store.get(&id)).await
    }

    /// Lists sessions in creation order.
    ///
    /// # Errors
    ///
    /// Returns `StoreFailure` if the store errors.
    #[instrument(skip(self))]
    pub async fn list_sessions(&self) -> Result<Vec<Session>, OrchestrationError> {
        self.store_call(self.store.list_all()).await
    }

    /// Renames a session.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name, `NotFound` for an unknown
    /// session.
    #[instrument(skip(self))]
    pub async fn rename_session(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<(), OrchestrationError> {
        let id = parse_session_id(session_id)?;
        let name = require_text("name", name)?;
        let _guard = self.locks.acquire(&id).await;
        self.store_call(self.store.rename(&id, &name)).await
    }

    /// Deletes a session and its messages.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown session.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &str) -> Result<(), OrchestrationError> {
        let id = parse_session_id(session_id)?;
        let _guard = self.locks.acquire(&id).await;
        self.store_call(self.store.delete(&id)).await?;
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Lists a session's messages in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown session.
    #[instrument(skip(self))]
    pub async fn list_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<Message>, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        self.store_call(self.store.list_messages(&id)).await
    }

    /// Answers a text prompt.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `NotFound`, `BudgetExceeded`, `ToolNotFound`,
    /// `ToolInvocationFailure`, `BackendFailure` or `StoreFailure`. When the
    /// turn fails after the message was appended, it is stored as failed.
    #[instrument(
        skip(self, prompt),
        fields(request_id = %RequestId::new(), prompt_len = prompt.len())
    )]
    pub async fn converse(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<Message, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        let prompt = require_text("prompt", prompt)?;

        let _guard = self.locks.acquire(&id).await;
        self.ensure_session(&id, self.config.auto_create_sessions).await?;
        self.run_turn(&id, prompt, None, self.config.sampling.chat).await
    }

    /// Answers a text prompt about an image.
    ///
    /// # Errors
    ///
    /// As [`converse`](Self::converse), plus `MediaFailure` if the image is
    /// rejected.
    #[instrument(
        skip(self, prompt, raw_image),
        fields(request_id = %RequestId::new(), image_bytes = raw_image.len())
    )]
    pub async fn converse_with_image(
        &self,
        session_id: &str,
        prompt: &str,
        raw_image: &[u8],
    ) -> Result<Message, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        let prompt = require_text("prompt", prompt)?;
        if raw_image.is_empty() {
            return Err(OrchestrationError::validation("image", "must not be empty").into());
        }

        let _guard = self.locks.acquire(&id).await;
        self.ensure_session(&id, self.config.auto_create_sessions).await?;
        let image = match tokio::time::timeout(
            self.config.timeouts.media(),
            self.normalizer.normalize_image(raw_image),
        )
        .await
        {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return Err(from_media(e)),
            Err(_) => {
                return Err(OrchestrationError::MediaFailure {
                    reason: "image normalization timed out".to_string(),
                    retryable: true,
                }
                .into());
            }
        };
        debug!(mime_type = image.mime_type, "image normalized");
        self.run_turn(&id, prompt, Some(image.data_uri), self.config.sampling.image)
            .await
    }

    /// Transcribes audio and records the transcript as a turn.
    ///
    /// No tool loop applies.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `NotFound`, `BackendFailure` or `StoreFailure`,
    /// and `BudgetExceeded` if the system prompt and transcript alone exceed
    /// the token ceiling.
    #[instrument(
        skip(self, raw_audio),
        fields(request_id = %RequestId::new(), audio_bytes = raw_audio.len())
    )]
    pub async fn converse_with_audio(
        &self,
        session_id: &str,
        raw_audio: &[u8],
    ) -> Result<Message, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        if raw_audio.is_empty() {
            return Err(OrchestrationError::validation("audio", "must not be empty").into());
        }

        let _guard = self.locks.acquire(&id).await;
        self.ensure_session(&id, self.config.auto_create_sessions).await?;
        let history = self.store_call(self.store.list_messages(&id)).await?;
        let message = Message::pending(id.clone(), next_sequence(&history), "", 0, Modality::Audio);
        self.store_call(self.store.append_message(&id, message.clone()))
            .await?;

        let request = TranscriptionRequest {
            audio: raw_audio.to_vec(),
            language: self.config.transcription.language.clone(),
            prompt: self.config.transcription.prompt.clone(),
            temperature: self.config.transcription.temperature,
        };
        let result = match self.dispatcher.transcribe(&request).await {
            Ok(text) if text.trim().is_empty() => Err(OrchestrationError::BackendFailure {
                reason: "transcription returned no text".to_string(),
                retryable: false,
            }
            .into()),
            Ok(text) => self.fit_transcript(text),
            Err(report) => Err(from_dispatch(report)),
        };
        self.finish_turn(&id, message, result).await
    }

    /// Prices a transcript as the new turn of a later context.
    fn fit_transcript(&self, text: String) -> Result<(String, u32), OrchestrationError> {
        let budget = self.context.budget();
        let tokens = budget.estimate(&text);
        let required = budget
            .estimate(&self.config.system_prompt)
            .saturating_add(tokens);
        if required > budget.ceiling() {
            return Err(OrchestrationError::BudgetExceeded {
                required,
                ceiling: budget.ceiling(),
            }
            .into());
        }
        Ok((text, tokens))
    }

    /// Derives a short session name from the conversation and stores it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Validation` if nothing has been said yet,
    /// `BackendFailure` or `StoreFailure`.
    #[instrument(skip(self), fields(request_id = %RequestId::new()))]
    pub async fn summarize_session_name(
        &self,
        session_id: &str,
    ) -> Result<String, OrchestrationError> {
        let id = parse_session_id(session_id)?;
        let _guard = self.locks.acquire(&id).await;
        self.ensure_session(&id, false).await?;

        let messages = self.store_call(self.store.list_messages(&id)).await?;
        let text = self.conversation_text(&messages);
        if text.is_empty() {
            return Err(OrchestrationError::validation(
                "session_id",
                "session has no completed messages to summarize",
            )
            .into());
        }

        let context = vec![
            ContextEntry::system(self.config.summarize_prompt.clone()),
            ContextEntry::user(text),
        ];
        let outcome = self
            .dispatcher
            .dispatch(
                context,
                self.config.sampling.summarize,
                self.config.summary_budget_tokens,
                ToolSelection::None,
            )
            .await
            .map_err(from_dispatch)?;

        let name = clean_label(&outcome.completion);
        if name.is_empty() {
            return Err(OrchestrationError::BackendFailure {
                reason: "summary was empty".to_string(),
                retryable: false,
            }
            .into());
        }
        self.store_call(self.store.rename(&id, &name)).await?;
        info!(session_id = %id, %name, "session renamed from summary");
        Ok(name)
    }

    async fn run_turn(
        &self,
        id: &SessionId,
        prompt: String,
        media: Option<String>,
        sampling: SamplingConfig,
    ) -> Result<Message, OrchestrationError> {
        let history = self.store_call(self.store.list_messages(id)).await?;
        let turn = match &media {
            Some(uri) => NewTurn::with_media(prompt.clone(), uri.clone()),
            None => NewTurn::text(prompt.clone()),
        };
        let assembled = self.context.build(&history, turn).map_err(from_context)?;

        let prompt_tokens = self.context.budget().estimate(&prompt);
        let sequence = next_sequence(&history);
        let message = match media {
            Some(uri) => {
                Message::pending(id.clone(), sequence, prompt, prompt_tokens, Modality::Image)
                    .with_media_ref(uri)
            }
            None => Message::pending(id.clone(), sequence, prompt, prompt_tokens, Modality::Text),
        };
        self.store_call(self.store.append_message(id, message.clone()))
            .await?;

        let result = self
            .dispatcher
            .dispatch(
                assembled.entries,
                sampling,
                self.context.budget().ceiling(),
                ToolSelection::All,
            )
            .await
            .map(|outcome| {
                debug!(
                    tokens = outcome.tokens,
                    tool_rounds = outcome.tool_rounds(),
                    total_tokens = outcome.usage.total(),
                    "turn completed"
                );
                (outcome.completion, outcome.tokens)
            })
            .map_err(from_dispatch);
        self.finish_turn(id, message, result).await
    }

    async fn finish_turn(
        &self,
        id: &SessionId,
        mut message: Message,
        result: Result<(String, u32), OrchestrationError>,
    ) -> Result<Message, OrchestrationError> {
        match result {
            Ok((completion, tokens)) => {
                message.complete(completion, tokens).map_err(from_store)?;
                self.store_call(self.store.update_message(id, message.clone()))
                    .await?;
                Ok(message)
            }
            Err(report) => {
                let reason = report.current_context().to_string();
                warn!(session_id = %id, error = %reason, "turn aborted");
                if message.fail(reason).is_ok() {
                    let recorded = self.store_call(self.store.update_message(id, message)).await;
                    if let Err(store_report) = recorded {
                        warn!(
                            error = %store_report.current_context(),
                            "failed to record aborted turn"
                        );
                    }
                }
                Err(report)
            }
        }
    }

    async fn ensure_session(
        &self,
        id: &SessionId,
        create_missing: bool,
    ) -> Result<Session, OrchestrationError> {
        match self.store_call(self.store.get(id)).await {
            Err(report)
                if create_missing
                    && matches!(report.current_context(), OrchestrationError::NotFound { .. }) =>
            {
                info!(session_id = %id, "creating session on first use");
                self.store_call(self.store.create(Some(id.clone()))).await
            }
            other => other,
        }
    }

    /// Joins completed turns as `prompt completion` lines, keeping the
    /// newest lines that fit the summary budget.
    fn conversation_text(&self, messages: &[Message]) -> String {
        let budget = self.context.budget();
        let limit = self.config.summary_budget_tokens;
        let mut used = 0u32;
        let mut lines: Vec<String> = Vec::new();

        for message in messages.iter().rev().filter(|m| m.is_completed()) {
            let line = format!("{} {}", message.prompt, message.completion)
                .trim()
                .to_string();
            let cost = budget.estimate(&line);
            if used.saturating_add(cost) > limit {
                if lines.is_empty() {
                    let max_chars = usize::try_from(limit.saturating_mul(4)).unwrap_or(usize::MAX);
                    lines.push(line.chars().take(max_chars).collect());
                }
                break;
            }
            used += cost;
            lines.push(line);
        }

        lines.reverse();
        lines.join("\n")
    }

    async fn store_call<T, F>(&self, call: F) -> Result<T, OrchestrationError>
    where
        F: Future<Output = std::result::Result<T, SessionError>>,
    {
        match tokio::time::timeout(self.config.timeouts.store(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(from_store(e)),
            Err(_) => Err(OrchestrationError::StoreFailure {
                reason: "session store call timed out".to_string(),
                timed_out: true,
            }
            .into()),
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, OrchestrationError> {
    raw.parse::<SessionId>()
        .map_err(|e| Report::from(OrchestrationError::validation("session_id", e.reason)))
}

fn require_text(field: &'static str, raw: &str) -> Result<String, OrchestrationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(OrchestrationError::validation(field, "must not be empty").into());
    }
    Ok(trimmed.to_string())
}

fn next_sequence(history: &[Message]) -> u64 {
    history.last().map_or(1, |m| m.sequence + 1)
}

/// Strips whitespace, quotes and trailing periods from a generated label.
fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use multichat_ai::{
        CompletionOutcome, CompletionRequest, ContextRole, LlmError, TokenUsage, ToolArgs, ToolCall,
        ToolDescriptor, ToolError, ToolInvoker,
    };
    use multichat_conversation::{Base64ImageNormalizer, InMemorySessionStore, MessageStatus};
    use std::collections::VecDeque;
    use std::result::Result;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<CompletionOutcome, LlmError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
        transcript: String,
        transcriptions: AtomicU32,
        delay: Option<Duration>,
        repeat_tool_call: bool,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<CompletionOutcome, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                transcript: "What time is it in Tokyo?".to_string(),
                transcriptions: AtomicU32::new(0),
                delay: None,
                repeat_tool_call: false,
            })
        }

        fn answering(answers: &[&str]) -> Arc<Self> {
            Self::new(answers.iter().map(|a| Ok(final_answer(a, 3))).collect())
        }

        fn delayed(answers: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(answers.iter().map(|a| Ok(final_answer(a, 3))).collect()),
                requests: Mutex::new(Vec::new()),
                transcript: String::new(),
                transcriptions: AtomicU32::new(0),
                delay: Some(delay),
                repeat_tool_call: false,
            })
        }

        fn always_tool() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                transcript: String::new(),
                transcriptions: AtomicU32::new(0),
                delay: None,
                repeat_tool_call: true,
            })
        }

        fn transcribing(transcript: &str) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                transcript: transcript.to_string(),
                transcriptions: AtomicU32::new(0),
                delay: None,
                repeat_tool_call: false,
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionOutcome, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.repeat_tool_call {
                return Ok(tool_requested("get_weather"));
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::RequestFailed {
                    reason: "script exhausted".to_string(),
                }))
        }

        async fn transcribe(&self, _request: &TranscriptionRequest) -> Result<String, LlmError> {
            self.transcriptions.fetch_add(1, Ordering::SeqCst);
            Ok(self.transcript.clone())
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct WeatherTool {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolInvoker for WeatherTool {
        async fn invoke(&self, _args: &ToolArgs) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("22C, clear".to_string())
        }
    }

    /// Store whose reads succeed and whose writes fail.
    struct ReadOnlyStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn create(&self, id: Option<SessionId>) -> Result<Session, SessionError> {
            self.inner.create(id).await
        }

        async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
            self.inner.get(id).await
        }

        async fn list_all(&self) -> Result<Vec<Session>, SessionError> {
            self.inner.list_all().await
        }

        async fn rename(&self, _id: &SessionId, _name: &str) -> Result<(), SessionError> {
            Err(read_only())
        }

        async fn delete(&self, _id: &SessionId) -> Result<(), SessionError> {
            Err(read_only())
        }

        async fn append_message(
            &self,
            _id: &SessionId,
            _message: Message,
        ) -> Result<(), SessionError> {
            Err(read_only())
        }

        async fn update_message(
            &self,
            _id: &SessionId,
            _message: Message,
        ) -> Result<(), SessionError> {
            Err(read_only())
        }

        async fn list_messages(&self, id: &SessionId) -> Result<Vec<Message>, SessionError> {
            self.inner.list_messages(id).await
        }
    }

    fn read_only() -> SessionError {
        SessionError::StorageFailed {
            reason: "read-only".to_string(),
        }
    }

    /// Store that never answers `list_messages`.
    struct StalledStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for StalledStore {
        async fn create(&self, id: Option<SessionId>) -> Result<Session, SessionError> {
            self.inner.create(id).await
        }

        async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
            self.inner.get(id).await
        }

        async fn list_all(&self) -> Result<Vec<Session>, SessionError> {
            self.inner.list_all().await
        }

        async fn rename(&self, id: &SessionId, name: &str) -> Result<(), SessionError> {
            self.inner.rename(id, name).await
        }

        async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
            self.inner.delete(id).await
        }

        async fn append_message(
            &self,
            id: &SessionId,
            message: Message,
        ) -> Result<(), SessionError> {
            self.inner.append_message(id, message).await
        }

        async fn update_message(
            &self,
            id: &SessionId,
            message: Message,
        ) -> Result<(), SessionError> {
            self.inner.update_message(id, message).await
        }

        async fn list_messages(&self, _id: &SessionId) -> Result<Vec<Message>, SessionError> {
            std::future::pending().await
        }
    }

    fn final_answer(content: &str, tokens: u32) -> CompletionOutcome {
        CompletionOutcome::Final {
            content: content.to_string(),
            usage: TokenUsage {
                input_tokens: 40,
                output_tokens: tokens,
            },
        }
    }

    fn tool_requested(name: &str) -> CompletionOutcome {
        CompletionOutcome::ToolRequested {
            calls: vec![ToolCall::new("call_1", name, serde_json::json!({"city": "Rabat"}))],
            usage: TokenUsage {
                input_tokens: 40,
                output_tokens: 5,
            },
        }
    }

    fn weather_registry() -> (Arc<ToolRegistry>, Arc<WeatherTool>) {
        let tool = Arc::new(WeatherTool {
            calls: AtomicU32::new(0),
        });
        let registry = ToolRegistry::builder()
            .register(ToolDescriptor::new("get_weather", "Current weather", tool.clone()))
            .expect("register")
            .build();
        (Arc::new(registry), tool)
    }

    fn service_with(
        config: OrchestrationConfig,
        store: Arc<dyn SessionStore>,
        backend: Arc<ScriptedBackend>,
    ) -> OrchestrationService {
        let (tools, _) = weather_registry();
        OrchestrationService::new(
            config,
            Collaborators {
                store,
                normalizer: Arc::new(Base64ImageNormalizer::default()),
                backend,
                tools,
            },
        )
        .expect("service")
    }

    fn service(backend: Arc<ScriptedBackend>) -> OrchestrationService {
        service_with(
            OrchestrationConfig::default(),
            Arc::new(InMemorySessionStore::new()),
            backend,
        )
    }

    #[test]
    fn zero_token_ceiling_is_rejected() {
        let config = OrchestrationConfig {
            max_conversation_tokens: 0,
            ..OrchestrationConfig::default()
        };
        let (tools, _) = weather_registry();
        let result = OrchestrationService::new(
            config,
            Collaborators {
                store: Arc::new(InMemorySessionStore::new()),
                normalizer: Arc::new(Base64ImageNormalizer::default()),
                backend: ScriptedBackend::answering(&[]),
                tools,
            },
        );
        let report = result.err().expect("rejected");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation {
                field: "max_conversation_tokens",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn converse_replays_history_and_records_completion() {
        let backend = ScriptedBackend::new(vec![
            Ok(final_answer("Hello! How can I help?", 6)),
            Ok(final_answer("4", 1)),
        ]);
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        service.converse("chat-1", "Hi").await.expect("first turn");
        let message = service.converse("chat-1", "What's 2+2?").await.expect("second turn");

        assert_eq!(message.completion, "4");
        assert_eq!(message.tokens, 1);
        assert_eq!(message.sequence, 2);
        assert_eq!(message.status, MessageStatus::Completed);

        let context = &backend.requests()[1].context;
        let roles: Vec<ContextRole> = context.iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![
                ContextRole::System,
                ContextRole::User,
                ContextRole::Assistant,
                ContextRole::User
            ]
        );
        assert_eq!(context[3].text(), "What's 2+2?");

        let session = service.get_session("chat-1").await.expect("session");
        let messages = service.list_messages("chat-1").await.expect("messages");
        let expected: u64 = messages.iter().map(|m| u64::from(m.context_cost())).sum();
        assert_eq!(session.token_count, expected);
    }

    #[tokio::test]
    async fn tool_round_feeds_final_answer() {
        let backend = ScriptedBackend::new(vec![
            Ok(tool_requested("get_weather")),
            Ok(final_answer("It's 22°C and clear in Rabat.", 12)),
        ]);
        let service = service(backend.clone());
        service.create_session(Some("trip")).await.expect("create");

        let message = service
            .converse("trip", "What's the weather in Rabat?")
            .await
            .expect("turn");

        assert_eq!(message.completion, "It's 22°C and clear in Rabat.");
        assert_eq!(message.tokens, 12);
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].context.last().expect("tool entry");
        assert_eq!(last.role, ContextRole::Tool);
        assert_eq!(last.text(), "22C, clear");
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_call() {
        let backend = ScriptedBackend::answering(&["unused"]);
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service.converse("chat-1", "   ").await.expect_err("empty prompt");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation { field: "prompt", .. }
        ));
        let report = service.converse("", "Hi").await.expect_err("empty id");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation { field: "session_id", .. }
        ));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found_unless_auto_created() {
        let backend = ScriptedBackend::answering(&["hi there"]);
        let strict = service(backend.clone());
        let report = strict.converse("ghost", "Hi").await.expect_err("not found");
        assert!(matches!(report.current_context(), OrchestrationError::NotFound { .. }));
        assert!(backend.requests().is_empty());

        let config = OrchestrationConfig {
            auto_create_sessions: true,
            ..OrchestrationConfig::default()
        };
        let lenient = service_with(config, Arc::new(InMemorySessionStore::new()), backend);
        let message = lenient.converse("ghost", "Hi").await.expect("auto-created");
        assert_eq!(message.completion, "hi there");
        assert_eq!(lenient.list_sessions().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn oversized_turn_is_budget_exceeded_and_stores_nothing() {
        let config = OrchestrationConfig {
            max_conversation_tokens: 40,
            system_prompt: "Be brief.".to_string(),
            ..OrchestrationConfig::default()
        };
        let backend = ScriptedBackend::answering(&["unused"]);
        let service = service_with(config, Arc::new(InMemorySessionStore::new()), backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service
            .converse("chat-1", &"x".repeat(400))
            .await
            .expect_err("over budget");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::BudgetExceeded { ceiling: 40, .. }
        ));
        assert!(backend.requests().is_empty());
        assert!(service.list_messages("chat-1").await.expect("messages").is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_fails_turn_and_records_reason() {
        let backend = ScriptedBackend::new(vec![Ok(tool_requested("book_hotel"))]);
        let service = service(backend);
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service.converse("chat-1", "Book me a room").await.expect_err("unknown tool");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::ToolNotFound { name } if name == "book_hotel"
        ));

        let messages = service.list_messages("chat-1").await.expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert!(messages[0].error.as_deref().is_some_and(|e| e.contains("book_hotel")));
        let session = service.get_session("chat-1").await.expect("session");
        assert_eq!(session.token_count, 0);
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_round_bound() {
        let backend = ScriptedBackend::always_tool();
        let config = OrchestrationConfig {
            max_tool_rounds: 2,
            ..OrchestrationConfig::default()
        };
        let service = service_with(config, Arc::new(InMemorySessionStore::new()), backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service.converse("chat-1", "Weather?").await.expect_err("bounded");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::BackendFailure { retryable: false, .. }
        ));
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn failed_turn_is_not_replayed() {
        let backend = ScriptedBackend::new(vec![
            Err(LlmError::RequestFailed {
                reason: "bad gateway".to_string(),
            }),
            Ok(final_answer("Hello!", 2)),
        ]);
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        service.converse("chat-1", "First try").await.expect_err("fails");
        let message = service.converse("chat-1", "Second try").await.expect("succeeds");

        assert_eq!(message.sequence, 2);
        assert_eq!(backend.requests()[1].context.len(), 2);
    }

    #[tokio::test]
    async fn image_turn_attaches_media_and_uses_image_sampling() {
        let backend = ScriptedBackend::answering(&["A cat on a sofa."]);
        let service = service(backend.clone());
        service.create_session(Some("pics")).await.expect("create");

        let message = service
            .converse_with_image("pics", "What is in this picture?", PNG)
            .await
            .expect("image turn");

        assert_eq!(message.modality, Modality::Image);
        assert!(
            message
                .media_ref
                .as_deref()
                .is_some_and(|r| r.starts_with("data:image/png;base64,"))
        );
        let request = &backend.requests()[0];
        assert_eq!(request.sampling.temperature, 0.5);
        let last = request.context.last().expect("turn");
        assert!(last.has_image());
        assert_eq!(last.text(), "What is in this picture?");
    }

    #[tokio::test]
    async fn unrecognized_image_is_media_failure() {
        let backend = ScriptedBackend::answering(&["unused"]);
        let service = service(backend.clone());
        service.create_session(Some("pics")).await.expect("create");

        let report = service
            .converse_with_image("pics", "What is this?", b"not an image")
            .await
            .expect_err("media");
        assert!(matches!(report.current_context(), OrchestrationError::MediaFailure { .. }));
        assert!(backend.requests().is_empty());

        let report = service
            .converse_with_image("pics", "What is this?", &[])
            .await
            .expect_err("empty");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation { field: "image", .. }
        ));
    }

    #[tokio::test]
    async fn audio_turn_stores_transcript_without_completion_call() {
        let backend = ScriptedBackend::transcribing("What time is it in Tokyo?");
        let service = service(backend.clone());
        service.create_session(Some("voice")).await.expect("create");

        let message = service.converse_with_audio("voice", b"RIFF....WAVE").await.expect("audio");

        assert_eq!(message.modality, Modality::Audio);
        assert_eq!(message.prompt, "");
        assert_eq!(message.completion, "What time is it in Tokyo?");
        assert_eq!(message.tokens, 7);
        assert_eq!(backend.transcriptions.load(Ordering::SeqCst), 1);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_chat_answer_fails_turn() {
        let backend = ScriptedBackend::answering(&[""]);
        let service = service(backend);
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service.converse("chat-1", "Hi").await.expect_err("empty answer");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::BackendFailure { retryable: false, .. }
        ));

        let messages = service.list_messages("chat-1").await.expect("messages");
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(messages[0].completion, "");
        let session = service.get_session("chat-1").await.expect("session");
        assert_eq!(session.token_count, 0);
    }

    #[tokio::test]
    async fn oversized_transcript_is_budget_exceeded() {
        let config = OrchestrationConfig {
            max_conversation_tokens: 40,
            system_prompt: "Be brief.".to_string(),
            ..OrchestrationConfig::default()
        };
        let backend = ScriptedBackend::transcribing(&"word ".repeat(200));
        let service = service_with(config, Arc::new(InMemorySessionStore::new()), backend);
        service.create_session(Some("voice")).await.expect("create");

        let report = service
            .converse_with_audio("voice", b"RIFF....WAVE")
            .await
            .expect_err("over budget");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::BudgetExceeded { ceiling: 40, .. }
        ));

        let messages = service.list_messages("voice").await.expect("messages");
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(service.get_session("voice").await.expect("session").token_count, 0);
    }

    #[derive(Clone, Default)]
    struct SpanRecorder {
        spans: Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>,
    }

    struct FieldVisitor(Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanRecorder {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut visitor = FieldVisitor(Vec::new());
            attrs.record(&mut visitor);
            self.spans
                .lock()
                .unwrap()
                .push((attrs.metadata().name().to_string(), visitor.0));
        }
    }

    #[tokio::test]
    async fn each_turn_span_carries_its_own_request_id() {
        use tracing_subscriber::layer::SubscriberExt;

        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _default = tracing::subscriber::set_default(subscriber);

        let service = service(ScriptedBackend::answering(&["one", "two"]));
        service.create_session(Some("chat-1")).await.expect("create");
        service.converse("chat-1", "first").await.expect("turn");
        service.converse("chat-1", "second").await.expect("turn");

        let request_ids: Vec<String> = recorder
            .spans
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == "converse")
            .filter_map(|(_, fields)| {
                fields
                    .iter()
                    .find(|(field, _)| field == "request_id")
                    .map(|(_, value)| value.clone())
            })
            .collect();

        assert_eq!(request_ids.len(), 2);
        assert!(request_ids.iter().all(|id| id.starts_with("req_")));
        assert_ne!(request_ids[0], request_ids[1]);
    }

    #[tokio::test]
    async fn empty_transcript_fails_audio_turn() {
        let backend = ScriptedBackend::transcribing("  ");
        let service = service(backend);
        service.create_session(Some("voice")).await.expect("create");

        let report = service.converse_with_audio("voice", b"RIFF").await.expect_err("empty");
        assert!(matches!(report.current_context(), OrchestrationError::BackendFailure { .. }));
        let messages = service.list_messages("voice").await.expect("messages");
        assert_eq!(messages[0].status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn summarize_names_session_without_tools() {
        let backend = ScriptedBackend::new(vec![
            Ok(final_answer("Sure, Paris is lovely in spring.", 8)),
            Ok(final_answer(" \"Paris Trip.\" ", 2)),
        ]);
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");
        service
            .converse("chat-1", "Help me plan a trip to Paris")
            .await
            .expect("turn");

        let name = service.summarize_session_name("chat-1").await.expect("summary");

        assert_eq!(name, "Paris Trip");
        assert_eq!(service.get_session("chat-1").await.expect("session").name, "Paris Trip");
        let request = &backend.requests()[1];
        assert!(request.tools.is_empty());
        assert_eq!(request.sampling.temperature, 0.0);
        assert_eq!(
            request.context[1].text(),
            "Help me plan a trip to Paris Sure, Paris is lovely in spring."
        );
    }

    #[tokio::test]
    async fn summarize_keeps_newest_lines_within_budget() {
        let config = OrchestrationConfig {
            summary_budget_tokens: 5,
            ..OrchestrationConfig::default()
        };
        let backend = ScriptedBackend::answering(&["a", "b", "Label"]);
        let service = service_with(config, Arc::new(InMemorySessionStore::new()), backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");
        service.converse("chat-1", "old question").await.expect("turn");
        service.converse("chat-1", "new one").await.expect("turn");

        service.summarize_session_name("chat-1").await.expect("summary");

        assert_eq!(backend.requests()[2].context[1].text(), "new one b");
    }

    #[tokio::test]
    async fn summarize_empty_session_is_validation() {
        let backend = ScriptedBackend::answering(&[]);
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        let report = service.summarize_session_name("chat-1").await.expect_err("nothing said");
        assert!(matches!(report.current_context(), OrchestrationError::Validation { .. }));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let service = service(ScriptedBackend::answering(&[]));
        let generated = service.create_session(None).await.expect("generated");
        assert!(generated.id.as_str().starts_with("sess_"));
        service.create_session(Some("chat-1")).await.expect("explicit");

        let report = service.create_session(Some("chat-1")).await.expect_err("duplicate");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation { field: "session_id", .. }
        ));

        let ids: Vec<String> = service
            .list_sessions()
            .await
            .expect("list")
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec![generated.id.to_string(), "chat-1".to_string()]);

        service.rename_session("chat-1", "Weekend plans").await.expect("rename");
        assert_eq!(service.get_session("chat-1").await.expect("get").name, "Weekend plans");

        service.delete_session("chat-1").await.expect("delete");
        let report = service.get_session("chat-1").await.expect_err("gone");
        assert!(matches!(report.current_context(), OrchestrationError::NotFound { .. }));
        let report = service.rename_session("chat-1", "x").await.expect_err("gone");
        assert!(matches!(report.current_context(), OrchestrationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_are_serialized() {
        let backend = ScriptedBackend::delayed(&["first", "second"], Duration::from_millis(20));
        let service = service(backend.clone());
        service.create_session(Some("chat-1")).await.expect("create");

        let (a, b) = tokio::join!(
            service.converse("chat-1", "one"),
            service.converse("chat-1", "two")
        );
        let (a, b) = (a.expect("a"), b.expect("b"));

        assert_eq!((a.sequence, b.sequence), (1, 2));
        let second = &backend.requests()[1].context;
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].text(), "first");
    }

    #[tokio::test]
    async fn store_write_failure_is_store_failure() {
        let inner = InMemorySessionStore::new();
        inner
            .create(Some("chat-1".parse().expect("id")))
            .await
            .expect("create");
        let backend = ScriptedBackend::answering(&["unused"]);
        let service = service_with(
            OrchestrationConfig::default(),
            Arc::new(ReadOnlyStore { inner }),
            backend.clone(),
        );

        let report = service.converse("chat-1", "Hi").await.expect_err("write fails");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::StoreFailure { timed_out: false, .. }
        ));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out_as_retryable() {
        let inner = InMemorySessionStore::new();
        inner
            .create(Some("chat-1".parse().expect("id")))
            .await
            .expect("create");
        let service = service_with(
            OrchestrationConfig::default(),
            Arc::new(StalledStore { inner }),
            ScriptedBackend::answering(&["unused"]),
        );

        let report = service.converse("chat-1", "Hi").await.expect_err("timeout");
        assert!(matches!(
            report.current_context(),
            OrchestrationError::StoreFailure { timed_out: true, .. }
        ));
        assert!(report.current_context().is_retryable());
    }
}
