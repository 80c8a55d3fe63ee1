//! Message types for conversations.
//!
//! A message is one prompt-completion pair. It is created pending when the
//! user submits a prompt and transitions exactly once, to completed or to
//! failed.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use multichat_core::{MessageId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the turn was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Plain text prompt.
    Text,
    /// Text prompt with an attached image.
    Image,
    /// Audio, answered by transcription.
    Audio,
}

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Submitted, awaiting the completion.
    Pending,
    /// Completion arrived; immutable.
    Completed,
    /// The turn was aborted; immutable.
    Failed,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// A turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The owning session.
    pub session_id: SessionId,
    /// Position within the session; strictly increasing.
    pub sequence: u64,
    /// The user's prompt text.
    pub prompt: String,
    /// The generated completion; empty until answered.
    pub completion: String,
    /// Estimated tokens of the prompt text.
    pub prompt_tokens: u32,
    /// Completion tokens reported by the backend.
    pub tokens: u32,
    /// How the turn was submitted.
    pub modality: Modality,
    /// Encoded media payload or URI, for image turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Failure reason, for failed turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the prompt was submitted.
    pub created_at: DateTime<Utc>,
    /// When the message left the pending state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Creates a pending message.
    #[must_use]
    pub fn pending(
        session_id: SessionId,
        sequence: u64,
        prompt: impl Into<String>,
        prompt_tokens: u32,
        modality: Modality,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            sequence,
            prompt: prompt.into(),
            completion: String::new(),
            prompt_tokens,
            tokens: 0,
            modality,
            media_ref: None,
            status: MessageStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Attaches a media reference.
    #[must_use]
    pub fn with_media_ref(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }

    /// Records the completion.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the message is
    /// pending.
    pub fn complete(
        &mut self,
        completion: impl Into<String>,
        tokens: u32,
    ) -> Result<(), SessionError> {
        self.ensure_pending(MessageStatus::Completed)?;
        self.completion = completion.into();
        self.tokens = tokens;
        self.status = MessageStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the turn failed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the message is
    /// pending.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_pending(MessageStatus::Failed)?;
        self.error = Some(reason.into());
        self.status = MessageStatus::Failed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_pending(&self, to: MessageStatus) -> Result<(), SessionError> {
        if self.status == MessageStatus::Pending {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Returns true once the completion has been recorded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == MessageStatus::Completed
    }

    /// Token cost of replaying this message as history.
    #[must_use]
    pub fn context_cost(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.tokens)
    }
}
