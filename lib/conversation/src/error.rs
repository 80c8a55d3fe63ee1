//! Error types for the conversation crate.
//!
//! These are the plain errors returned by conversation collaborators; the
//! orchestration layer wraps them with rootcause context:
//! - `SessionError`: Errors from session store operations
//! - `ContextError`: Errors from context assembly
//! - `MediaError`: Errors from media normalization

use multichat_core::{MessageId, SessionId};
use std::fmt;

/// Errors from session store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session not found.
    NotFound { id: SessionId },
    /// A session with this ID already exists.
    AlreadyExists { id: SessionId },
    /// Message not found in the session.
    MessageNotFound {
        session_id: SessionId,
        message_id: MessageId,
    },
    /// Appended message does not advance the session's sequence.
    SequenceConflict { last: u64, attempted: u64 },
    /// Invalid message status transition.
    InvalidTransition { from: String, to: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "session not found: {id}"),
            Self::AlreadyExists { id } => write!(f, "session already exists: {id}"),
            Self::MessageNotFound {
                session_id,
                message_id,
            } => write!(f, "message {message_id} not found in session {session_id}"),
            Self::SequenceConflict { last, attempted } => {
                write!(f, "message sequence {attempted} does not follow {last}")
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid message transition from {from} to {to}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "session storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors from context assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The system prompt and new turn alone exceed the token ceiling.
    BudgetExceeded { required: u32, ceiling: u32 },
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetExceeded { required, ceiling } => {
                write!(
                    f,
                    "new turn needs {required} tokens but the ceiling is {ceiling}"
                )
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Errors from media normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// No bytes were supplied.
    Empty,
    /// Input exceeds the accepted size.
    TooLarge { size: usize, max: usize },
    /// The bytes are not a recognized image format.
    UnsupportedFormat,
    /// The external codec failed.
    CodecFailed { reason: String },
}

impl MediaError {
    /// Returns true if retrying with the same input may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CodecFailed { .. })
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "media payload is empty"),
            Self::TooLarge { size, max } => {
                write!(f, "media payload is {size} bytes, limit is {max}")
            }
            Self::UnsupportedFormat => write!(f, "unsupported media format"),
            Self::CodecFailed { reason } => write!(f, "media codec failed: {reason}"),
        }
    }
}

impl std::error::Error for MediaError {}
