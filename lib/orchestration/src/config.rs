//! Engine configuration.
//!
//! Built once at startup and handed to the service; never mutated.

use multichat_ai::SamplingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant that helps travellers through chat. \
You track flights, report the weather and suggest places to visit, eat or stay once you know the \
city or area. Keep your answers short and to the point.";

const DEFAULT_SUMMARIZE_PROMPT: &str = "Summarize this text. One to three words maximum length. \
Plain text only. No punctuation, markup or tags.";

/// Orchestration engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Token ceiling for system prompt, retained history and new turn.
    #[serde(default = "default_max_conversation_tokens")]
    pub max_conversation_tokens: u32,

    /// Similarity threshold for a response cache. Parsed but unused.
    #[serde(default = "default_cache_similarity_score")]
    pub cache_similarity_score: f32,

    /// System prompt for conversation turns.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// System prompt for session-name summarization.
    #[serde(default = "default_summarize_prompt")]
    pub summarize_prompt: String,

    /// Token budget for the conversation text sent to summarization.
    #[serde(default = "default_summary_budget_tokens")]
    pub summary_budget_tokens: u32,

    /// Flat token estimate charged for an attached image.
    #[serde(default = "default_image_token_estimate")]
    pub image_token_estimate: u32,

    /// Sampling profiles per call kind.
    #[serde(default)]
    pub sampling: SamplingProfiles,

    /// Audio transcription settings.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Time budgets for external calls.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Maximum tool-call rounds per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Create unknown sessions on first converse instead of failing.
    #[serde(default)]
    pub auto_create_sessions: bool,
}

fn default_max_conversation_tokens() -> u32 {
    4000
}

fn default_cache_similarity_score() -> f32 {
    0.99
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_summarize_prompt() -> String {
    DEFAULT_SUMMARIZE_PROMPT.to_string()
}

fn default_summary_budget_tokens() -> u32 {
    1000
}

fn default_image_token_estimate() -> u32 {
    85
}

fn default_max_tool_rounds() -> u32 {
    5
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_conversation_tokens: default_max_conversation_tokens(),
            cache_similarity_score: default_cache_similarity_score(),
            system_prompt: default_system_prompt(),
            summarize_prompt: default_summarize_prompt(),
            summary_budget_tokens: default_summary_budget_tokens(),
            image_token_estimate: default_image_token_estimate(),
            sampling: SamplingProfiles::default(),
            transcription: TranscriptionConfig::default(),
            timeouts: TimeoutConfig::default(),
            max_tool_rounds: default_max_tool_rounds(),
            auto_create_sessions: false,
        }
    }
}

/// Sampling parameters per call kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingProfiles {
    /// Conversation turns.
    #[serde(default = "default_chat_sampling")]
    pub chat: SamplingConfig,
    /// Turns carrying an image.
    #[serde(default = "default_image_sampling")]
    pub image: SamplingConfig,
    /// Session-name summarization.
    #[serde(default = "default_summarize_sampling")]
    pub summarize: SamplingConfig,
}

fn default_chat_sampling() -> SamplingConfig {
    SamplingConfig::new(0.2, 0.7, 1000)
}

fn default_image_sampling() -> SamplingConfig {
    SamplingConfig::new(0.5, 0.7, 1000)
}

fn default_summarize_sampling() -> SamplingConfig {
    SamplingConfig::new(0.0, 1.0, 100)
}

impl Default for SamplingProfiles {
    fn default() -> Self {
        Self {
            chat: default_chat_sampling(),
            image: default_image_sampling(),
            summarize: default_summarize_sampling(),
        }
    }
}

/// Audio transcription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// ISO-639-1 language hint.
    #[serde(default = "default_language")]
    pub language: String,
    /// Optional style prompt in the audio's language.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_transcription_temperature")]
    pub temperature: f32,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_transcription_temperature() -> f32 {
    0.3
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            prompt: None,
            temperature: default_transcription_temperature(),
        }
    }
}

/// Time budgets for external calls, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per completion or transcription call.
    #[serde(default = "default_backend_secs")]
    pub backend_secs: u64,
    /// Per tool invocation.
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
    /// Per session store call.
    #[serde(default = "default_store_secs")]
    pub store_secs: u64,
    /// Per image normalization.
    #[serde(default = "default_media_secs")]
    pub media_secs: u64,
}

fn default_backend_secs() -> u64 {
    60
}

fn default_tool_secs() -> u64 {
    15
}

fn default_store_secs() -> u64 {
    5
}

fn default_media_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            backend_secs: default_backend_secs(),
            tool_secs: default_tool_secs(),
            store_secs: default_store_secs(),
            media_secs: default_media_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Backend call budget.
    #[must_use]
    pub fn backend(&self) -> Duration {
        Duration::from_secs(self.backend_secs)
    }

    /// Tool call budget.
    #[must_use]
    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }

    /// Store call budget.
    #[must_use]
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    /// Media normalization budget.
    #[must_use]
    pub fn media(&self) -> Duration {
        Duration::from_secs(self.media_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_call_profiles() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.max_tool_rounds, 5);
        assert_eq!(config.sampling.chat, SamplingConfig::new(0.2, 0.7, 1000));
        assert_eq!(config.sampling.image.temperature, 0.5);
        assert_eq!(config.sampling.summarize, SamplingConfig::new(0.0, 1.0, 100));
        assert_eq!(config.transcription.language, "en");
        assert!(!config.auto_create_sessions);
        assert_eq!(config.timeouts.tool(), Duration::from_secs(15));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: OrchestrationConfig = serde_json::from_value(serde_json::json!({
            "max_conversation_tokens": 250,
            "sampling": { "chat": { "temperature": 0.9, "top_p": 0.5, "max_tokens": 64 } },
            "timeouts": { "backend_secs": 5 }
        }))
        .expect("deserialize");

        assert_eq!(config.max_conversation_tokens, 250);
        assert_eq!(config.sampling.chat.max_tokens, 64);
        assert_eq!(config.sampling.image, SamplingConfig::new(0.5, 0.7, 1000));
        assert_eq!(config.timeouts.backend(), Duration::from_secs(5));
        assert_eq!(config.timeouts.store_secs, 5);
        assert!(config.summarize_prompt.starts_with("Summarize this text."));
    }
}
