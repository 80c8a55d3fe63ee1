//! multichat console entry point.
//!
//! Usage: `multichat-chat [config.toml]`

use multichat_ai::OpenAiBackend;
use multichat_chat::{AppConfig, Console};
use multichat_conversation::{Base64ImageNormalizer, InMemorySessionStore};
use multichat_integration::builtin_registry;
use multichat_orchestration::{Collaborators, OrchestrationService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(path.as_deref()).expect("failed to load configuration");
    tracing::info!(
        provider = %config.backend.provider,
        model = %config.backend.model,
        "Loaded configuration"
    );

    let client = reqwest::Client::new();
    let backend = OpenAiBackend::new(config.backend).expect("invalid backend configuration");
    let tools = builtin_registry(&client, &config.tools).expect("failed to register tools");
    tracing::info!(tools = tools.len(), "Registered tools");

    let service = OrchestrationService::new(
        config.chat,
        Collaborators {
            store: Arc::new(InMemorySessionStore::new()),
            normalizer: Arc::new(Base64ImageNormalizer::new(config.max_image_bytes)),
            backend: Arc::new(backend),
            tools: Arc::new(tools),
        },
    )
    .expect("invalid engine configuration");

    let mut console = Console::start(&service, tokio::io::stdout())
        .await
        .expect("failed to start console");
    if let Err(e) = console.run(BufReader::new(tokio::io::stdin())).await {
        tracing::error!(error = %e, "console I/O failed");
        std::process::exit(1);
    }
}
