//! Completion primitives for multichat.
//!
//! This crate provides the pieces a conversation turn is built from:
//!
//! - **Backend**: the provider-neutral completion and transcription seam
//! - **Tools**: the read-only registry of callable tools
//! - **Dispatch**: the bounded tool-invocation loop driving a turn to a
//!   final answer
//!
//! `OpenAiBackend` is the HTTP implementation for OpenAI and Azure OpenAI.

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod openai;
pub mod tool;

pub use backend::{
    CompletionBackend, CompletionOutcome, CompletionRequest, ContentItem, ContextEntry,
    ContextRole, LlmBackendConfig, LlmProvider, SamplingConfig, TokenUsage, ToolCall, ToolSpec,
    TranscriptionRequest,
};
pub use dispatch::{
    CompletionDispatcher, DispatchConfig, DispatchOutcome, ToolInvocation, ToolRound,
    ToolSelection,
};
pub use error::{DispatchError, LlmError, ToolError};
pub use openai::OpenAiBackend;
pub use tool::{ToolArgs, ToolDescriptor, ToolInvoker, ToolRegistry, ToolRegistryBuilder};
