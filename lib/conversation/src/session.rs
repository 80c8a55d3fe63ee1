//! Conversation sessions and their storage contract.
//!
//! Sessions are named, ordered conversation threads. The store owns both
//! sessions and their messages, keyed by session id.

use crate::error::SessionError;
use crate::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multichat_core::SessionId;
use serde::{Deserialize, Serialize};

/// Name given to sessions before they are renamed or summarized.
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

/// A conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Accumulated context cost of completed messages.
    pub token_count: u64,
    /// Position in creation order across the store.
    pub created_order: u64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When a message was last recorded.
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Creates a new session with the default name.
    #[must_use]
    pub fn new(id: SessionId, created_order: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: DEFAULT_SESSION_NAME.to_string(),
            token_count: 0,
            created_order,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Adds a completed message's cost and marks the session active.
    pub fn record_completion(&mut self, message: &Message) {
        self.token_count = self
            .token_count
            .saturating_add(u64::from(message.context_cost()));
        self.touch();
    }

    /// Marks the session active now.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Trait for session and message storage.
///
/// `list_messages` must return messages in strictly increasing sequence
/// order, exactly as appended.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session, generating an ID if none is given.
    async fn create(&self, id: Option<SessionId>) -> Result<Session, SessionError>;

    /// Gets a session by ID.
    async fn get(&self, id: &SessionId) -> Result<Session, SessionError>;

    /// Lists all sessions in creation order.
    async fn list_all(&self) -> Result<Vec<Session>, SessionError>;

    /// Renames a session.
    async fn rename(&self, id: &SessionId, name: &str) -> Result<(), SessionError>;

    /// Deletes a session and all of its messages.
    async fn delete(&self, id: &SessionId) -> Result<(), SessionError>;

    /// Appends a message; its sequence must exceed every stored sequence.
    async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), SessionError>;

    /// Replaces a pending message with its completed or failed form.
    async fn update_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), SessionError>;

    /// Lists a session's messages ordered by sequence.
    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, SessionError>;
}
