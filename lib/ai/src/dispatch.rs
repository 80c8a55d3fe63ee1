//! Completion dispatcher: the tool-invocation loop.
//!
//! The dispatcher sends an assembled context to the backend and drives the
//! exchange to a final answer:
//! 1. Send context plus the advertised tools (`AwaitingModel`)
//! 2. Backend answers with content (`Final`) or with tool calls
//!    (`ToolRequested`)
//! 3. Resolve every requested tool by exact name, then invoke them in order
//!    (`InvokingTools`), appending each result to the context
//! 4. Re-submit and repeat until final, or until the round bound is hit
//!
//! Every backend and tool call is bounded by a timeout. A tool failure
//! aborts the turn; it is never replaced by an empty result.

use crate::backend::{
    CompletionBackend, CompletionOutcome, CompletionRequest, ContextEntry, SamplingConfig,
    TokenUsage, ToolCall, TranscriptionRequest,
};
use crate::error::{DispatchError, LlmError, ToolError};
use crate::tool::{ToolDescriptor, ToolRegistry};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Configuration for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum tool-call rounds before the turn fails.
    pub max_tool_rounds: u32,
    /// Time budget for one backend call.
    pub backend_timeout: Duration,
    /// Time budget for one tool call.
    pub tool_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            backend_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(15),
        }
    }
}

/// Which registered tools are advertised for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSelection {
    /// Every registered tool.
    All,
    /// No tools; the backend must answer directly.
    None,
}

/// Record of a single tool invocation within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// The tool that was invoked.
    pub tool_name: String,
    /// Arguments provided to the tool.
    pub arguments: JsonValue,
    /// The tool's string result.
    pub output: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// One tool-call round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRound {
    /// Round number (1-indexed).
    pub round: u32,
    /// Invocations made in this round, in request order.
    pub invocations: Vec<ToolInvocation>,
}

/// The result of a dispatched turn.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// The final natural-language completion.
    pub completion: String,
    /// Completion tokens of the final backend response.
    pub tokens: u32,
    /// Usage summed over every backend call of the turn.
    pub usage: TokenUsage,
    /// Tool rounds consumed.
    pub rounds: Vec<ToolRound>,
}

impl DispatchOutcome {
    /// Returns the number of tool rounds consumed.
    #[must_use]
    pub fn tool_rounds(&self) -> u32 {
        self.rounds.len() as u32
    }
}

enum DispatchState<'a> {
    AwaitingModel,
    ToolRequested(Vec<ToolCall>),
    InvokingTools(Vec<(ToolCall, &'a ToolDescriptor)>),
    Final { content: String, tokens: u32 },
}

impl DispatchState<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "awaiting_model",
            Self::ToolRequested(_) => "tool_requested",
            Self::InvokingTools(_) => "invoking_tools",
            Self::Final { .. } => "final",
        }
    }
}

/// Drives completions, resolving tool calls against a registry.
#[derive(Clone)]
pub struct CompletionDispatcher {
    backend: Arc<dyn CompletionBackend>,
    tools: Arc<ToolRegistry>,
    config: DispatchConfig,
}

impl CompletionDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: Arc<ToolRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }

    /// Returns the tool registry.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs one turn to a final answer.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` report if the backend fails or times out, a
    /// requested tool is unregistered or fails, or the round bound is
    /// exceeded.
    #[instrument(skip_all, fields(model = %self.backend.model(), entries = context.len()))]
    pub async fn dispatch(
        &self,
        context: Vec<ContextEntry>,
        sampling: SamplingConfig,
        token_budget: u32,
        selection: ToolSelection,
    ) -> Result<DispatchOutcome, Report<DispatchError>> {
        let tools = match selection {
            ToolSelection::All => self.tools.specs(),
            ToolSelection::None => Vec::new(),
        };
        let mut request = CompletionRequest {
            context,
            tools,
            sampling,
            token_budget,
        };
        let mut usage = TokenUsage::default();
        let mut rounds: Vec<ToolRound> = Vec::new();
        let mut state = DispatchState::AwaitingModel;

        loop {
            debug!(state = state.name(), round = rounds.len(), "dispatch step");
            state = match state {
                DispatchState::AwaitingModel => match self.call_backend(&request).await? {
                    CompletionOutcome::Final {
                        content,
                        usage: call_usage,
                    } => {
                        usage.accumulate(call_usage);
                        if content.trim().is_empty() {
                            warn!("backend returned an empty completion");
                            return Err(Report::from(DispatchError::Backend {
                                reason: "empty completion".to_string(),
                                retryable: false,
                            }));
                        }
                        DispatchState::Final {
                            content,
                            tokens: call_usage.output_tokens,
                        }
                    }
                    CompletionOutcome::ToolRequested {
                        calls,
                        usage: call_usage,
                    } => {
                        usage.accumulate(call_usage);
                        if calls.is_empty() {
                            return Err(Report::from(DispatchError::Backend {
                                reason: "tool call directive without any calls".to_string(),
                                retryable: false,
                            }));
                        }
                        if rounds.len() as u32 >= self.config.max_tool_rounds {
                            warn!(max = self.config.max_tool_rounds, "tool round bound exceeded");
                            return Err(Report::from(DispatchError::MaxRoundsExceeded {
                                max: self.config.max_tool_rounds,
                            }));
                        }
                        DispatchState::ToolRequested(calls)
                    }
                },
                DispatchState::ToolRequested(calls) => {
                    let resolved = calls
                        .into_iter()
                        .map(|call| match self.tools.get(&call.name) {
                            Some(tool) => Ok((call, tool)),
                            None => {
                                warn!(tool = %call.name, "backend requested unregistered tool");
                                Err(Report::new(ToolError::NotFound {
                                    name: call.name.clone(),
                                })
                                .context(DispatchError::ToolNotFound { name: call.name }))
                            }
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    DispatchState::InvokingTools(resolved)
                }
                DispatchState::InvokingTools(resolved) => {
                    let calls = resolved.iter().map(|(call, _)| call.clone()).collect();
                    request.context.push(ContextEntry::assistant_tool_calls(calls));

                    let mut invocations = Vec::with_capacity(resolved.len());
                    for (call, tool) in resolved {
                        let started = Instant::now();
                        let output = self.invoke_tool(tool, &call).await?;
                        request
                            .context
                            .push(ContextEntry::tool_result(&call, output.clone()));
                        invocations.push(ToolInvocation {
                            tool_name: call.name,
                            arguments: call.arguments,
                            output,
                            latency_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    rounds.push(ToolRound {
                        round: rounds.len() as u32 + 1,
                        invocations,
                    });
                    DispatchState::AwaitingModel
                }
                DispatchState::Final { content, tokens } => {
                    debug!(tokens, rounds = rounds.len(), "dispatch finished");
                    return Ok(DispatchOutcome {
                        completion: content,
                        tokens,
                        usage,
                        rounds,
                    });
                }
            };
        }
    }

    /// Transcribes audio, bypassing the tool loop.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError::Backend` report if transcription fails or
    /// times out.
    #[instrument(skip_all, fields(bytes = request.audio.len()))]
    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<String, Report<DispatchError>> {
        match tokio::time::timeout(self.config.backend_timeout, self.backend.transcribe(request))
            .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(backend_report(e)),
            Err(_) => Err(backend_report(LlmError::Timeout)),
        }
    }

    async fn call_backend(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, Report<DispatchError>> {
        match tokio::time::timeout(self.config.backend_timeout, self.backend.complete(request))
            .await
        {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(backend_report(e)),
            Err(_) => Err(backend_report(LlmError::Timeout)),
        }
    }

    async fn invoke_tool(
        &self,
        tool: &ToolDescriptor,
        call: &ToolCall,
    ) -> Result<String, Report<DispatchError>> {
        let JsonValue::Object(args) = &call.arguments else {
            let err = ToolError::InvalidInput {
                name: call.name.clone(),
                reason: format!("arguments must be a JSON object, got {}", call.arguments),
            };
            return Err(tool_report(err, &call.name, false));
        };

        debug!(tool = %call.name, call_id = %call.id, "invoking tool");
        match tokio::time::timeout(self.config.tool_timeout, tool.invoke(args)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                let timed_out = matches!(e, ToolError::Timeout { .. });
                warn!(tool = %call.name, error = %e, "tool invocation failed");
                Err(tool_report(e, &call.name, timed_out))
            }
            Err(_) => {
                warn!(tool = %call.name, "tool invocation timed out");
                let err = ToolError::Timeout {
                    name: call.name.clone(),
                };
                Err(tool_report(err, &call.name, true))
            }
        }
    }
}

fn backend_report(error: LlmError) -> Report<DispatchError> {
    let context = DispatchError::Backend {
        reason: error.to_string(),
        retryable: error.is_retryable(),
    };
    Report::new(error).context(context)
}

fn tool_report(error: ToolError, name: &str, timed_out: bool) -> Report<DispatchError> {
    let context = DispatchError::ToolFailed {
        name: name.to_string(),
        reason: error.to_string(),
        timed_out,
    };
    Report::new(error).context(context)
}
