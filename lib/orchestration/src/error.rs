//! Error types for the orchestration crate.
//!
//! `OrchestrationError` is the public taxonomy every service operation
//! reports. Lower-layer failures (`SessionError`, `DispatchError`,
//! `ContextError`, `MediaError`) stay attached as child reports.

use multichat_ai::DispatchError;
use multichat_conversation::{ContextError, MediaError, SessionError};
use multichat_core::SessionId;
use rootcause::Report;
use std::fmt;

/// Errors surfaced by the orchestration service.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    /// A required field is missing, empty or invalid.
    Validation { field: &'static str, reason: String },
    /// The session does not exist.
    NotFound { session_id: SessionId },
    /// The system prompt and new turn alone exceed the token ceiling.
    BudgetExceeded { required: u32, ceiling: u32 },
    /// The backend requested an unregistered tool.
    ToolNotFound { name: String },
    /// A tool call errored or timed out.
    ToolInvocationFailure {
        name: String,
        reason: String,
        timed_out: bool,
    },
    /// Completion or transcription failed, timed out, or exceeded the
    /// tool-round bound.
    BackendFailure { reason: String, retryable: bool },
    /// The session store errored or timed out.
    StoreFailure { reason: String, timed_out: bool },
    /// The media normalizer rejected or failed on the payload.
    MediaFailure { reason: String, retryable: bool },
}

impl OrchestrationError {
    /// Returns true if retrying the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ToolInvocationFailure { timed_out, .. }
            | Self::StoreFailure { timed_out, .. } => *timed_out,
            Self::BackendFailure { retryable, .. } | Self::MediaFailure { retryable, .. } => {
                *retryable
            }
            Self::Validation { .. }
            | Self::NotFound { .. }
            | Self::BudgetExceeded { .. }
            | Self::ToolNotFound { .. } => false,
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::NotFound { session_id } => write!(f, "session not found: {session_id}"),
            Self::BudgetExceeded { required, ceiling } => write!(
                f,
                "turn needs {required} tokens, over the {ceiling}-token ceiling"
            ),
            Self::ToolNotFound { name } => write!(f, "tool not found: {name}"),
            Self::ToolInvocationFailure { name, reason, .. } => {
                write!(f, "tool '{name}' failed: {reason}")
            }
            Self::BackendFailure { reason, .. } => write!(f, "completion backend failed: {reason}"),
            Self::StoreFailure { reason, .. } => write!(f, "session store failed: {reason}"),
            Self::MediaFailure { reason, .. } => write!(f, "media normalization failed: {reason}"),
        }
    }
}

impl std::error::Error for OrchestrationError {}

/// Maps the outermost dispatch failure onto the public taxonomy.
#[must_use]
pub fn from_dispatch(report: Report<DispatchError>) -> Report<OrchestrationError> {
    let context = match report.current_context() {
        DispatchError::Backend { reason, retryable } => OrchestrationError::BackendFailure {
            reason: reason.clone(),
            retryable: *retryable,
        },
        DispatchError::ToolNotFound { name } => {
            OrchestrationError::ToolNotFound { name: name.clone() }
        }
        DispatchError::ToolFailed {
            name,
            reason,
            timed_out,
        } => OrchestrationError::ToolInvocationFailure {
            name: name.clone(),
            reason: reason.clone(),
            timed_out: *timed_out,
        },
        error @ DispatchError::MaxRoundsExceeded { .. } => OrchestrationError::BackendFailure {
            reason: error.to_string(),
            retryable: false,
        },
    };
    report.context(context)
}

/// Maps a store failure onto the public taxonomy.
#[must_use]
pub fn from_store(error: SessionError) -> Report<OrchestrationError> {
    let context = match &error {
        SessionError::NotFound { id } => OrchestrationError::NotFound {
            session_id: id.clone(),
        },
        SessionError::AlreadyExists { id } => {
            OrchestrationError::validation("session_id", format!("'{id}' is already in use"))
        }
        other => OrchestrationError::StoreFailure {
            reason: other.to_string(),
            timed_out: false,
        },
    };
    Report::new(error).context(context)
}

/// Maps a context-assembly failure onto the public taxonomy.
#[must_use]
pub fn from_context(error: ContextError) -> Report<OrchestrationError> {
    let context = match &error {
        ContextError::BudgetExceeded { required, ceiling } => OrchestrationError::BudgetExceeded {
            required: *required,
            ceiling: *ceiling,
        },
    };
    Report::new(error).context(context)
}

/// Maps a normalizer failure onto the public taxonomy.
#[must_use]
pub fn from_media(error: MediaError) -> Report<OrchestrationError> {
    let context = OrchestrationError::MediaFailure {
        reason: error.to_string(),
        retryable: error.is_retryable(),
    };
    Report::new(error).context(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_failures_map_to_public_kinds() {
        let report = from_dispatch(Report::from(DispatchError::MaxRoundsExceeded { max: 5 }));
        assert!(matches!(
            report.current_context(),
            OrchestrationError::BackendFailure { retryable: false, .. }
        ));

        let report = from_dispatch(Report::from(DispatchError::ToolFailed {
            name: "get_weather".to_string(),
            reason: "timed out".to_string(),
            timed_out: true,
        }));
        assert!(report.current_context().is_retryable());

        let report = from_dispatch(Report::from(DispatchError::ToolNotFound {
            name: "book_hotel".to_string(),
        }));
        assert_eq!(
            report.current_context(),
            &OrchestrationError::ToolNotFound {
                name: "book_hotel".to_string()
            }
        );
    }

    #[test]
    fn store_not_found_is_not_a_store_failure() {
        let id: SessionId = "ghost".parse().expect("id");
        let report = from_store(SessionError::NotFound { id: id.clone() });
        assert_eq!(report.current_context(), &OrchestrationError::NotFound { session_id: id });

        let report = from_store(SessionError::StorageFailed {
            reason: "disk".to_string(),
        });
        assert!(!report.current_context().is_retryable());
    }

    #[test]
    fn duplicate_session_is_validation() {
        let id: SessionId = "chat-1".parse().expect("id");
        let report = from_store(SessionError::AlreadyExists { id });
        assert!(matches!(
            report.current_context(),
            OrchestrationError::Validation { field: "session_id", .. }
        ));
    }

    #[test]
    fn display_names_the_field() {
        let err = OrchestrationError::validation("prompt", "must not be empty");
        assert_eq!(err.to_string(), "invalid prompt: must not be empty");
    }
}
