//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `LlmError`: Low-level completion backend operations
//! - `ToolError`: Tool registration and invocation failures
//! - `DispatchError`: Tool-loop failures reported by the dispatcher

use std::fmt;

/// Errors from completion backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider is unavailable.
    ProviderUnavailable { provider: String, reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// Timeout waiting for response.
    Timeout,
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::Timeout | Self::RateLimited { .. }
        )
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from tool registration and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Tool not found.
    NotFound { name: String },
    /// A tool with this name is already registered.
    DuplicateName { name: String },
    /// Tool execution failed.
    ExecutionFailed { name: String, reason: String },
    /// Invalid tool input.
    InvalidInput { name: String, reason: String },
    /// Tool call exceeded its time budget.
    Timeout { name: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "tool not found: {name}"),
            Self::DuplicateName { name } => {
                write!(f, "tool '{name}' is already registered")
            }
            Self::ExecutionFailed { name, reason } => {
                write!(f, "tool '{name}' execution failed: {reason}")
            }
            Self::InvalidInput { name, reason } => {
                write!(f, "invalid input for tool '{name}': {reason}")
            }
            Self::Timeout { name } => write!(f, "tool '{name}' timed out"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors that abort a dispatched turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The backend call failed or timed out.
    Backend { reason: String, retryable: bool },
    /// The backend requested a tool that is not registered.
    ToolNotFound { name: String },
    /// A tool call errored or timed out.
    ToolFailed {
        name: String,
        reason: String,
        timed_out: bool,
    },
    /// The backend kept requesting tools past the round bound.
    MaxRoundsExceeded { max: u32 },
}

impl DispatchError {
    /// Returns true if retrying the turn may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::ToolFailed { timed_out, .. } => *timed_out,
            Self::ToolNotFound { .. } | Self::MaxRoundsExceeded { .. } => false,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { reason, .. } => write!(f, "completion backend failed: {reason}"),
            Self::ToolNotFound { name } => {
                write!(f, "backend requested unregistered tool '{name}'")
            }
            Self::ToolFailed { name, reason, .. } => {
                write!(f, "tool '{name}' failed: {reason}")
            }
            Self::MaxRoundsExceeded { max } => {
                write!(f, "exceeded {max} tool-call rounds without a final answer")
            }
        }
    }
}

impl std::error::Error for DispatchError {}
