//! Application configuration.
//!
//! Loaded via the `config` crate from an optional TOML file, then
//! environment variables prefixed `MULTICHAT` with `__` between sections
//! (`MULTICHAT__CHAT__MAX_CONVERSATION_TOKENS=2000`).

use multichat_ai::LlmBackendConfig;
use multichat_conversation::media::DEFAULT_MAX_IMAGE_BYTES;
use multichat_integration::ToolsConfig;
use multichat_orchestration::OrchestrationConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Default file looked up in the working directory when no path is given.
const DEFAULT_CONFIG_FILE: &str = "multichat";

/// Top-level configuration for the console front end.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Completion backend connection.
    pub backend: LlmBackendConfig,

    /// Engine settings.
    #[serde(default)]
    pub chat: OrchestrationConfig,

    /// Built-in tool endpoints.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Largest accepted image upload, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

impl AppConfig {
    /// Loads configuration from `path` (or `./multichat.toml` if present)
    /// and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is missing, a value has the
    /// wrong type, or an explicitly given file cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_from(path, None)
    }

    fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MULTICHAT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
