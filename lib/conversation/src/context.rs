//! Context assembly for a new turn.
//!
//! The builder turns stored history plus a new prompt into the ordered
//! entries presented to the completion backend. History is truncated with a
//! sliding window: the oldest messages are dropped first until the rest
//! fits. The system prompt and the new turn are never truncated.

use crate::budget::TokenBudgetManager;
use crate::error::ContextError;
use crate::message::{Message, Modality};
use multichat_ai::{ContentItem, ContextEntry};
use tracing::debug;

/// The turn being submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    /// Prompt text.
    pub text: String,
    /// Normalized media reference travelling with the prompt.
    pub media: Option<String>,
}

impl NewTurn {
    /// Creates a text-only turn.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    /// Creates a turn carrying media.
    #[must_use]
    pub fn with_media(text: impl Into<String>, media: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Some(media.into()),
        }
    }

    fn into_entry(self) -> ContextEntry {
        match self.media {
            None => ContextEntry::user(self.text),
            Some(media) => ContextEntry::user_items(vec![
                ContentItem::text(self.text),
                ContentItem::image(media),
            ]),
        }
    }
}

/// The assembled context.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// Entries in presentation order: system, history, new turn.
    pub entries: Vec<ContextEntry>,
    /// History messages replayed.
    pub retained: usize,
    /// History messages dropped by truncation.
    pub dropped: usize,
    /// Estimated tokens of everything presented.
    pub estimated_tokens: u32,
}

/// Builds budgeted contexts around a fixed system prompt.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    budget: TokenBudgetManager,
}

impl ContextBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, budget: TokenBudgetManager) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            budget,
        }
    }

    /// Returns the budget manager.
    #[must_use]
    pub fn budget(&self) -> &TokenBudgetManager {
        &self.budget
    }

    /// Assembles the context for `turn` over `history`.
    ///
    /// Only completed messages are replayed; `history` must be in sequence
    /// order and must not contain the new turn.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::BudgetExceeded` if the system prompt and new
    /// turn alone exceed the ceiling.
    pub fn build(
        &self,
        history: &[Message],
        turn: NewTurn,
    ) -> Result<AssembledContext, ContextError> {
        let ceiling = self.budget.ceiling();
        let fixed = self
            .budget
            .estimate(&self.system_prompt)
            .saturating_add(self.budget.estimate_turn(&turn.text, turn.media.is_some()));
        if fixed > ceiling {
            return Err(ContextError::BudgetExceeded {
                required: fixed,
                ceiling,
            });
        }
        let available = ceiling - fixed;

        let replayable: Vec<&Message> = history.iter().filter(|m| m.is_completed()).collect();
        let keep_from = if self.budget.fits(replayable.iter().copied(), 0, available) {
            0
        } else {
            let mut used = 0u32;
            let mut start = replayable.len();
            for (i, message) in replayable.iter().enumerate().rev() {
                let cost = message.context_cost();
                if used.saturating_add(cost) > available {
                    break;
                }
                used += cost;
                start = i;
            }
            start
        };
        let retained = &replayable[keep_from..];

        let mut entries = Vec::with_capacity(retained.len() * 2 + 2);
        entries.push(ContextEntry::system(self.system_prompt.clone()));
        for message in retained {
            entries.extend(replay(message));
        }
        entries.push(turn.into_entry());

        let estimated_tokens =
            fixed.saturating_add(self.budget.history_cost(retained.iter().copied()));
        debug!(
            retained = retained.len(),
            dropped = keep_from,
            estimated_tokens,
            "context assembled"
        );
        Ok(AssembledContext {
            entries,
            retained: retained.len(),
            dropped: keep_from,
            estimated_tokens,
        })
    }
}

/// Replays one stored message as context entries.
///
/// Media is not replayed; audio turns replay their transcript as the user's
/// words.
#[must_use]
pub fn replay(message: &Message) -> Vec<ContextEntry> {
    match message.modality {
        Modality::Audio => vec![ContextEntry::user(message.completion.clone())],
        Modality::Text | Modality::Image => {
            let mut entries = vec![ContextEntry::user(message.prompt.clone())];
            if !message.completion.is_empty() {
                entries.push(ContextEntry::assistant(message.completion.clone()));
            }
            entries
        }
    }
}
