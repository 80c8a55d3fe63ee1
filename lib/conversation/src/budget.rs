//! Token estimation and budget checks.
//!
//! Estimates are a character heuristic (about four characters per token),
//! so they are deterministic and need no tokenizer or network call.

use crate::message::Message;

/// Characters per estimated token.
const CHARS_PER_TOKEN: u32 = 4;

/// Estimates and checks token cost against a fixed ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudgetManager {
    ceiling: u32,
    image_token_estimate: u32,
}

impl TokenBudgetManager {
    /// Creates a manager for a ceiling and a flat per-image estimate.
    #[must_use]
    pub const fn new(ceiling: u32, image_token_estimate: u32) -> Self {
        Self {
            ceiling,
            image_token_estimate,
        }
    }

    /// Returns the configured ceiling.
    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Estimates the tokens of a text.
    ///
    /// Monotonic in length: appending text never lowers the estimate.
    #[must_use]
    pub fn estimate(&self, text: &str) -> u32 {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        chars.div_ceil(CHARS_PER_TOKEN)
    }

    /// Estimates a new turn, counting any attached image.
    #[must_use]
    pub fn estimate_turn(&self, text: &str, has_media: bool) -> u32 {
        let media = if has_media {
            self.image_token_estimate
        } else {
            0
        };
        self.estimate(text).saturating_add(media)
    }

    /// Returns the total replay cost of a history.
    #[must_use]
    pub fn history_cost<'a>(&self, history: impl IntoIterator<Item = &'a Message>) -> u32 {
        history
            .into_iter()
            .fold(0u32, |acc, m| acc.saturating_add(m.context_cost()))
    }

    /// Returns true if the history plus the new turn fit within `budget`.
    #[must_use]
    pub fn fits<'a>(
        &self,
        history: impl IntoIterator<Item = &'a Message>,
        new_turn: u32,
        budget: u32,
    ) -> bool {
        self.history_cost(history).saturating_add(new_turn) <= budget
    }
}
