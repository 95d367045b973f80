//! mibo: an LLM chat relay.

mod config;
mod console;
mod openai;

use crate::config::RelayConfig;
use crate::console::ConsolePlatform;
use crate::openai::OpenAiBackend;
use mibo_ai::ReferenceCatalog;
use mibo_bus::EventBus;
use mibo_conversation::HeuristicTokenizer;
use mibo_core::ChatId;
use mibo_relay::events::ShutdownRequested;
use mibo_relay::{InMemoryHistory, Relay, RelayParts};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = RelayConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let catalog =
        ReferenceCatalog::load(&config.references_path).expect("failed to load references");
    let backend = OpenAiBackend::new(&config.llm).expect("failed to build LLM backend");

    let assistant_name = catalog
        .assistant(&config.default_assistant)
        .map_or_else(|| "mibo".to_string(), |a| a.display_name().to_string());

    let bus = EventBus::new();
    let relay = Relay::start(
        bus.clone(),
        RelayParts {
            catalog: Arc::new(catalog),
            settings: config.ref_settings(),
            history: Arc::new(InMemoryHistory::new()),
            backend: Arc::new(backend),
            platform: Arc::new(ConsolePlatform::new(tokio::io::stdout(), assistant_name)),
            tokenizer: Arc::new(HeuristicTokenizer),
            bot_username: config.bot_username.clone(),
            system_chat: config.system_chat.as_deref().map(ChatId::from),
        },
    );

    let shutdown = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown);
    bus.register(move |event: Arc<ShutdownRequested>| {
        let notify = Arc::clone(&notify);
        async move {
            tracing::info!(reason = %event.reason, "Shutdown requested");
            notify.notify_one();
            Ok(())
        }
    });

    let reader = tokio::spawn(console::read_lines(
        bus.clone(),
        BufReader::new(tokio::io::stdin()),
        config.console_user.clone(),
    ));

    tracing::info!("mibo is listening on the console");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Interrupted");
        }
        () = shutdown.notified() => {}
    }

    reader.abort();
    relay.stop().await;
}
