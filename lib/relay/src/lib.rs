//! Relay collaborators for mibo.
//!
//! Each collaborator owns one concern and talks to the others only through
//! the [`EventBus`](mibo_bus::EventBus):
//!
//! - [`RefStore`]: chats, their windows and the reference catalog
//! - [`Conductor`]: inbound messages, answer decisions and commands
//! - [`AssistantService`]: LLM completions
//! - [`DatabaseService`]: message history
//! - [`Delivery`]: outbound messages and error reports
//!
//! [`Relay`] wires all of them onto one bus.

pub mod assistant;
pub mod chat;
pub mod conductor;
pub mod database;
pub mod delivery;
pub mod error;
pub mod events;
pub mod refs;

pub use assistant::{AssistantService, split_reply};
pub use chat::{ChatKind, ChatState};
pub use conductor::Conductor;
pub use database::{DatabaseService, HistoryStore, InMemoryHistory};
pub use delivery::{ChatPlatform, Delivery};
pub use error::{HistoryError, PlatformError, RelayError};
pub use refs::{RefSettings, RefStore, SharedWindow, lock_window};

use mibo_ai::{LlmBackend, ReferenceCatalog};
use mibo_bus::{EventBus, HandlerId};
use mibo_conversation::Tokenizer;
use mibo_core::ChatId;
use std::sync::Arc;
use tracing::info;

/// Everything the relay needs from its host.
pub struct RelayParts {
    pub catalog: Arc<ReferenceCatalog>,
    pub settings: RefSettings,
    pub history: Arc<dyn HistoryStore>,
    pub backend: Arc<dyn LlmBackend>,
    pub platform: Arc<dyn ChatPlatform>,
    pub tokenizer: Arc<dyn Tokenizer>,
    /// Bot username without the `@`.
    pub bot_username: String,
    /// Operator chat for error reports.
    pub system_chat: Option<ChatId>,
}

/// The collaborators, registered on one bus.
pub struct Relay {
    pub bus: EventBus,
    pub refs: Arc<RefStore>,
    pub conductor: Arc<Conductor>,
    pub assistant: Arc<AssistantService>,
    pub database: Arc<DatabaseService>,
    pub delivery: Arc<Delivery>,
    handlers: Vec<HandlerId>,
}

impl Relay {
    /// Builds the collaborators, registers their handlers and starts the
    /// idle-chat sweep.
    #[must_use]
    pub fn start(bus: EventBus, parts: RelayParts) -> Self {
        let refs = Arc::new(RefStore::new(bus.clone(), parts.catalog, parts.settings));
        let conductor = Arc::new(Conductor::new(
            bus.clone(),
            Arc::clone(&refs),
            Arc::clone(&parts.tokenizer),
            parts.bot_username,
        ));
        let assistant = Arc::new(AssistantService::new(
            bus.clone(),
            Arc::clone(&refs),
            parts.backend,
            parts.tokenizer,
        ));
        let database = Arc::new(DatabaseService::new(bus.clone(), parts.history));
        let delivery = Arc::new(Delivery::new(bus.clone(), parts.platform, parts.system_chat));

        let mut handlers = Vec::new();
        handlers.extend(database.register());
        handlers.extend(conductor.register());
        handlers.extend(assistant.register());
        handlers.extend(delivery.register());
        refs.spawn_cleanup();

        info!(handlers = handlers.len(), "relay started");
        Self {
            bus,
            refs,
            conductor,
            assistant,
            database,
            delivery,
            handlers,
        }
    }

    /// Identifiers of every handler the relay registered.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerId] {
        &self.handlers
    }

    /// Stops the idle sweep, then shuts the bus down.
    pub async fn stop(&self) {
        self.refs.close().await;
        self.bus.shutdown().await;
        info!("relay stopped");
    }
}
