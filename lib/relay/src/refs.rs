//! The reference store: chats, windows and the reference catalog.
//!
//! Chats and windows live in memory. A window is created on first access,
//! sized from the chat's model, and hydrated from history through a
//! correlated [`MemoryRequest`]. A periodic sweep evicts idle chats in two
//! phases: the first sweep past half the TTL clears `in_use`, and a later
//! sweep evicts the chat if nothing touched it in between.

use crate::chat::{ChatKind, ChatState};
use crate::error::RelayError;
use crate::events::{ErrorEvent, MemoryRequest, MemoryResponse, NewChat, StoredMessage};
use mibo_ai::{AssistantReference, ModelReference, ReferenceCatalog};
use mibo_bus::EventBus;
use mibo_conversation::{Window, WindowConfig};
use mibo_core::ChatId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// A window shared between the collaborators of one chat.
pub type SharedWindow = Arc<Mutex<Window>>;

/// Locks a shared window, recovering from poisoning.
pub fn lock_window(window: &SharedWindow) -> MutexGuard<'_, Window> {
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tunables of the reference store.
#[derive(Debug, Clone)]
pub struct RefSettings {
    pub default_model: String,
    pub default_assistant: String,
    /// Answer chance given to new chats.
    pub default_chance: u8,
    /// Idle time after which a chat may be evicted.
    pub chat_ttl: Duration,
    pub cleanup_interval: Duration,
    /// Deadline for window hydration.
    pub memory_timeout: Duration,
    /// Image-reference cache size of each window.
    pub max_images: usize,
}

impl Default for RefSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4.1".to_string(),
            default_assistant: "default".to_string(),
            default_chance: 5,
            chat_ttl: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(30),
            memory_timeout: Duration::from_secs(5),
            max_images: 3,
        }
    }
}

/// In-memory owner of chats and their windows.
pub struct RefStore {
    bus: EventBus,
    catalog: Arc<ReferenceCatalog>,
    settings: RefSettings,
    chats: Mutex<HashMap<ChatId, ChatState>>,
    windows: Mutex<HashMap<ChatId, SharedWindow>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl RefStore {
    /// Creates a store over `catalog`.
    #[must_use]
    pub fn new(bus: EventBus, catalog: Arc<ReferenceCatalog>, settings: RefSettings) -> Self {
        Self {
            bus,
            catalog,
            settings,
            chats: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            cleanup: Mutex::new(None),
        }
    }

    /// The reference catalog.
    #[must_use]
    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    /// The store's settings.
    #[must_use]
    pub fn settings(&self) -> &RefSettings {
        &self.settings
    }

    /// Loads or creates a chat and marks it as in use.
    ///
    /// Creating a chat emits [`NewChat`].
    pub async fn chat(&self, chat_id: &ChatId, name: &str, kind: ChatKind) -> ChatState {
        let (state, created) = {
            let mut chats = lock(&self.chats);
            let mut created = false;
            let state = chats.entry(chat_id.clone()).or_insert_with(|| {
                created = true;
                ChatState::new(chat_id.clone(), name, kind, self.settings.default_chance)
            });
            state.touch();
            if !name.is_empty() && state.name != name {
                state.name = name.to_string();
            }
            (state.clone(), created)
        };

        if created {
            info!(chat_id = %chat_id, kind = %kind, "new chat");
            self.bus
                .emit(NewChat::new(chat_id.clone(), state.name.clone(), kind))
                .await;
        }
        state
    }

    /// Returns a snapshot of a loaded chat.
    #[must_use]
    pub fn chat_state(&self, chat_id: &ChatId) -> Option<ChatState> {
        lock(&self.chats).get(chat_id).cloned()
    }

    /// Number of chats in memory.
    #[must_use]
    pub fn chat_count(&self) -> usize {
        lock(&self.chats).len()
    }

    /// Returns the chat's window, creating and hydrating it if needed.
    ///
    /// Hydration waits up to the memory timeout for history. On timeout the
    /// window starts empty and an [`ErrorEvent`] is emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat's model is not in the catalog.
    #[instrument(skip(self, chat_id), fields(chat_id = %chat_id))]
    pub async fn window(&self, chat_id: &ChatId) -> mibo_core::Result<SharedWindow, RelayError> {
        if let Some(window) = lock(&self.windows).get(chat_id) {
            return Ok(Arc::clone(window));
        }

        let model = self.model_for(chat_id)?;
        let config = WindowConfig::default()
            .with_max_tokens(model.max_tokens)
            .with_max_images(self.settings.max_images);
        let mut window = Window::new(chat_id.clone(), config);

        let request = MemoryRequest::new(chat_id.clone(), model.max_tokens);
        match self
            .bus
            .wait::<MemoryRequest, MemoryResponse>(request, Some(self.settings.memory_timeout))
            .await
        {
            Ok(response) => {
                debug!(messages = response.messages.len(), "window hydrated");
                window.hydrate(
                    response
                        .messages
                        .iter()
                        .map(|m| (m.message.clone(), m.tokens)),
                );
            }
            Err(e) => {
                warn!(error = %e, "window hydration failed, starting empty");
                window.hydrate(Vec::new());
                self.bus
                    .emit(ErrorEvent::new(
                        Some(chat_id.clone()),
                        format!("could not load chat history: {e}"),
                    ))
                    .await;
            }
        }

        // A concurrent caller may have won the race; keep its window.
        let mut windows = lock(&self.windows);
        let window = windows
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(window)));
        Ok(Arc::clone(window))
    }

    /// Adds messages to the chat's window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window cannot be created.
    pub async fn add_messages(
        &self,
        chat_id: &ChatId,
        messages: Vec<StoredMessage>,
    ) -> mibo_core::Result<(), RelayError> {
        let window = self.window(chat_id).await?;
        let mut window = lock_window(&window);
        for stored in messages {
            window.add(stored.message, stored.tokens);
        }
        Ok(())
    }

    /// Resets the chat's window view, if one is loaded.
    pub fn clear_window(&self, chat_id: &ChatId) -> bool {
        let window = lock(&self.windows).get(chat_id).cloned();
        match window {
            Some(window) => {
                lock_window(&window).clear();
                true
            }
            None => false,
        }
    }

    /// Resolves the chat's model, falling back to the default model.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is not in the catalog.
    pub fn model_for(&self, chat_id: &ChatId) -> Result<ModelReference, RelayError> {
        let id = lock(&self.chats)
            .get(chat_id)
            .and_then(|c| c.model.clone())
            .unwrap_or_else(|| self.settings.default_model.clone());
        self.catalog
            .model(&id)
            .cloned()
            .ok_or(RelayError::UnknownModel { id })
    }

    /// Resolves the chat's assistant, falling back to the default assistant.
    ///
    /// # Errors
    ///
    /// Returns an error if the assistant is not in the catalog.
    pub fn assistant_for(&self, chat_id: &ChatId) -> Result<AssistantReference, RelayError> {
        let id = lock(&self.chats)
            .get(chat_id)
            .and_then(|c| c.assistant.clone())
            .unwrap_or_else(|| self.settings.default_assistant.clone());
        self.catalog
            .assistant(&id)
            .cloned()
            .ok_or(RelayError::UnknownAssistant { id })
    }

    /// Names the chat's assistant answers to; empty if it has none.
    #[must_use]
    pub fn assistant_names(&self, chat_id: &ChatId) -> Vec<String> {
        self.assistant_for(chat_id)
            .map(|a| a.names)
            .unwrap_or_default()
    }

    /// Sets the chat's answer chance.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat is not loaded or `chance` exceeds 100.
    pub fn set_chance(&self, chat_id: &ChatId, chance: u8) -> Result<(), RelayError> {
        if chance > 100 {
            return Err(RelayError::InvalidCommand {
                command: "chance".to_string(),
                reason: format!("{chance} is not between 0 and 100"),
            });
        }
        let mut chats = lock(&self.chats);
        let chat = chats.get_mut(chat_id).ok_or_else(|| RelayError::UnknownChat {
            chat_id: chat_id.clone(),
        })?;
        chat.chance = chance;
        Ok(())
    }

    /// Runs one idle sweep and returns how many chats were evicted.
    ///
    /// Windows whose chat is no longer loaded are dropped too. One can be
    /// recreated after its chat was evicted, e.g. by a late completion.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let idle_after = self.settings.chat_ttl / 2;
        let mut evicted = Vec::new();
        let live: HashSet<ChatId> = {
            let mut chats = lock(&self.chats);
            for (chat_id, chat) in chats.iter_mut() {
                if now.saturating_duration_since(chat.last_active) <= idle_after {
                    continue;
                }
                if chat.in_use {
                    chat.in_use = false;
                } else {
                    evicted.push(chat_id.clone());
                }
            }
            for chat_id in &evicted {
                chats.remove(chat_id);
            }
            chats.keys().cloned().collect()
        };

        let orphaned = {
            let mut windows = lock(&self.windows);
            let before = windows.len();
            windows.retain(|chat_id, _| live.contains(chat_id));
            before - windows.len()
        };

        if !evicted.is_empty() || orphaned > 0 {
            info!(
                evicted = evicted.len(),
                windows = orphaned,
                "evicted idle chats"
            );
        }
        evicted.len()
    }

    /// Starts the periodic idle sweep. Calling it again is a no-op.
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let mut slot = lock(&self.cleanup);
        if slot.is_some() {
            return;
        }

        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.cleanup_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.evict_idle(Instant::now());
            }
        }));
    }

    /// Stops the idle sweep.
    pub async fn close(&self) {
        let handle = lock(&self.cleanup).take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "cleanup task failed");
                }
            }
        }
        debug!("reference store closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
