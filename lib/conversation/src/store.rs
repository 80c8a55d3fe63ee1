//! In-memory session store.

use crate::error::SessionError;
use crate::message::{Message, MessageStatus};
use crate::session::{Session, SessionStore};
use async_trait::async_trait;
use multichat_core::SessionId;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct Entry {
    session: Session,
    messages: Vec<Message>,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<SessionId, Entry>,
    next_order: u64,
}

impl State {
    fn entry_mut(&mut self, id: &SessionId) -> Result<&mut Entry, SessionError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.clone() })
    }
}

/// Session store backed by process memory.
///
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    state: RwLock<State>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, id: Option<SessionId>) -> Result<Session, SessionError> {
        let mut state = self.state.write().await;
        let id = id.unwrap_or_default();
        if state.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists { id });
        }
        let session = Session::new(id.clone(), state.next_order);
        state.next_order += 1;
        state.sessions.insert(
            id,
            Entry {
                session: session.clone(),
                messages: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        let state = self.state.read().await;
        state
            .sessions
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| SessionError::NotFound { id: id.clone() })
    }

    async fn list_all(&self) -> Result<Vec<Session>, SessionError> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_order);
        Ok(sessions)
    }

    async fn rename(&self, id: &SessionId, name: &str) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        state.entry_mut(id)?.session.name = name.to_string();
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        state
            .sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound { id: id.clone() })
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(session_id)?;
        if let Some(last) = entry.messages.last().map(|m| m.sequence) {
            if message.sequence <= last {
                return Err(SessionError::SequenceConflict {
                    last,
                    attempted: message.sequence,
                });
            }
        }
        entry.session.touch();
        entry.messages.push(message);
        Ok(())
    }

    async fn update_message(
        &self,
        session_id: &SessionId,
        message: Message,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(session_id)?;
        let stored = entry
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| SessionError::MessageNotFound {
                session_id: session_id.clone(),
                message_id: message.id,
            })?;

        if stored.status != MessageStatus::Pending || message.status == MessageStatus::Pending {
            return Err(SessionError::InvalidTransition {
                from: stored.status.to_string(),
                to: message.status.to_string(),
            });
        }

        *stored = message;
        if stored.is_completed() {
            entry.session.record_completion(stored);
        } else {
            entry.session.touch();
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, SessionError> {
        let state = self.state.read().await;
        state
            .sessions
            .get(session_id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.clone(),
            })
    }
}
