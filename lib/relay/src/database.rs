//! Message history persistence.
//!
//! The [`DatabaseService`] adapts a [`HistoryStore`] onto the bus: it saves
//! every [`MessagesStored`] batch and answers [`MemoryRequest`]s used to
//! hydrate windows.

use crate::error::HistoryError;
use crate::events::{MemoryRequest, MemoryResponse, MessagesStored, StoredMessage};
use async_trait::async_trait;
use mibo_bus::{EventBus, HandlerError, HandlerId};
use mibo_core::ChatId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, instrument};

/// Trait for message history storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends messages to a chat's history.
    async fn save(&self, chat_id: &ChatId, messages: &[StoredMessage]) -> Result<(), HistoryError>;

    /// Loads the newest messages whose costs fit in `max_tokens`.
    ///
    /// Selection starts from the newest message and stops at the first one
    /// that would exceed the budget. The result is ordered oldest first.
    async fn recent(
        &self,
        chat_id: &ChatId,
        max_tokens: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError>;
}

/// In-process history store.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    chats: Mutex<HashMap<ChatId, Vec<StoredMessage>>>,
}

impl InMemoryHistory {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for a chat.
    #[must_use]
    pub fn len(&self, chat_id: &ChatId) -> usize {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chat_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn save(&self, chat_id: &ChatId, messages: &[StoredMessage]) -> Result<(), HistoryError> {
        self.chats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chat_id.clone())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn recent(
        &self,
        chat_id: &ChatId,
        max_tokens: usize,
    ) -> Result<Vec<StoredMessage>, HistoryError> {
        let chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(history) = chats.get(chat_id) else {
            return Ok(Vec::new());
        };

        let mut total = 0;
        let mut selected: Vec<StoredMessage> = history
            .iter()
            .rev()
            .take_while(|m| {
                total += m.tokens;
                total <= max_tokens
            })
            .cloned()
            .collect();
        selected.reverse();
        Ok(selected)
    }
}

/// Bus adapter for a [`HistoryStore`].
pub struct DatabaseService {
    bus: EventBus,
    store: Arc<dyn HistoryStore>,
}

impl DatabaseService {
    /// Creates the service.
    #[must_use]
    pub fn new(bus: EventBus, store: Arc<dyn HistoryStore>) -> Self {
        Self { bus, store }
    }

    /// Subscribes the service to its events.
    pub fn register(self: &Arc<Self>) -> Vec<HandlerId> {
        let saver = Arc::clone(self);
        let loader = Arc::clone(self);
        vec![
            self.bus.register(move |event: Arc<MessagesStored>| {
                let service = Arc::clone(&saver);
                async move { service.on_stored(&event).await.map_err(HandlerError::from) }
            }),
            self.bus.register(move |event: Arc<MemoryRequest>| {
                let service = Arc::clone(&loader);
                async move { service.on_memory(&event).await.map_err(HandlerError::from) }
            }),
        ]
    }

    /// Persists a batch of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the batch.
    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, count = event.messages.len()))]
    pub async fn on_stored(&self, event: &MessagesStored) -> Result<(), HistoryError> {
        self.store.save(&event.chat_id, &event.messages).await?;
        debug!("messages saved");
        Ok(())
    }

    /// Answers a history request with a correlated [`MemoryResponse`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot load history. No response is
    /// emitted then, and the waiting side times out.
    #[instrument(skip(self, request), fields(chat_id = %request.chat_id, max_tokens = request.max_tokens))]
    pub async fn on_memory(&self, request: &MemoryRequest) -> Result<(), HistoryError> {
        let messages = self
            .store
            .recent(&request.chat_id, request.max_tokens)
            .await?;
        debug!(count = messages.len(), "history loaded");
        self.bus
            .emit(MemoryResponse::reply_to(request, messages))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibo_conversation::Message;
    use std::time::Duration;

    fn stored(text: &str, tokens: usize) -> StoredMessage {
        StoredMessage::new(Message::user("u", text), tokens)
    }

    #[tokio::test]
    async fn recent_takes_newest_within_budget() {
        let history = InMemoryHistory::new();
        let chat = ChatId::from("c");
        history
            .save(
                &chat,
                &[stored("a", 30), stored("b", 30), stored("c", 30), stored("d", 30)],
            )
            .await
            .expect("save");

        let recent = history.recent(&chat, 70).await.expect("recent");
        let texts: Vec<&str> = recent.iter().map(|m| m.message.text()).collect();
        assert_eq!(texts, ["c", "d"]);

        assert!(history
            .recent(&ChatId::from("other"), 70)
            .await
            .expect("recent")
            .is_empty());
    }

    #[tokio::test]
    async fn stored_messages_are_saved() {
        let bus = EventBus::new();
        let history = Arc::new(InMemoryHistory::new());
        let service = Arc::new(DatabaseService::new(bus.clone(), history.clone()));
        service.register();

        let chat = ChatId::from("c");
        service
            .on_stored(&MessagesStored::new(chat.clone(), vec![stored("hi", 1)]))
            .await
            .expect("save");

        assert_eq!(history.len(&chat), 1);
    }

    #[tokio::test]
    async fn memory_requests_are_answered_through_wait() {
        let bus = EventBus::new();
        let history = Arc::new(InMemoryHistory::new());
        let chat = ChatId::from("c");
        history
            .save(&chat, &[stored("old", 10), stored("new", 10)])
            .await
            .expect("save");

        let service = Arc::new(DatabaseService::new(bus.clone(), history));
        service.register();

        let response: Arc<MemoryResponse> = bus
            .wait(
                MemoryRequest::new(chat.clone(), 100),
                Some(Duration::from_secs(1)),
            )
            .await
            .expect("response");

        assert_eq!(response.chat_id, chat);
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[0].message.text(), "old");
    }
}
