//! Outbound delivery to the chat platform.

use crate::error::PlatformError;
use crate::events::{AssistantResponse, ErrorEvent};
use async_trait::async_trait;
use mibo_bus::{EventBus, HandlerError, HandlerFailed, HandlerId};
use mibo_core::{ChatId, MessageId};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// A chat platform the relay can send text to.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Sends one message, optionally quoting `reply_to`.
    async fn send_text(
        &self,
        chat_id: &ChatId,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<(), PlatformError>;
}

/// Sends assistant responses and reports errors to the operator.
pub struct Delivery {
    bus: EventBus,
    platform: Arc<dyn ChatPlatform>,
    /// Operator chat that receives error reports.
    system_chat: Option<ChatId>,
}

impl Delivery {
    #[must_use]
    pub fn new(bus: EventBus, platform: Arc<dyn ChatPlatform>, system_chat: Option<ChatId>) -> Self {
        Self {
            bus,
            platform,
            system_chat,
        }
    }

    pub fn register(self: &Arc<Self>) -> Vec<HandlerId> {
        let sender = Arc::clone(self);
        let reporter = Arc::clone(self);
        vec![
            self.bus.register(move |event: Arc<AssistantResponse>| {
                let delivery = Arc::clone(&sender);
                async move { delivery.on_response(&event).await.map_err(HandlerError::from) }
            }),
            self.bus.register(move |event: Arc<ErrorEvent>| {
                let delivery = Arc::clone(&reporter);
                async move { delivery.on_error(&event).await.map_err(HandlerError::from) }
            }),
            self.bus.register(|event: Arc<HandlerFailed>| async move {
                error!(
                    event = event.kind,
                    chat_id = ?event.chat_id,
                    panicked = event.panicked,
                    error = %event.error,
                    "handler failed"
                );
                Ok(())
            }),
        ]
    }

    /// Sends each part of a response in order.
    ///
    /// Only the first part quotes the message being answered.
    ///
    /// # Errors
    ///
    /// Returns the first send failure. Later parts are not sent.
    #[instrument(skip(self, response), fields(chat_id = %response.chat_id, parts = response.messages.len()))]
    pub async fn on_response(&self, response: &AssistantResponse) -> Result<(), PlatformError> {
        for (index, text) in response.messages.iter().enumerate() {
            let reply_to = if index == 0 {
                response.reply_to.as_ref()
            } else {
                None
            };
            self.platform
                .send_text(&response.chat_id, text, reply_to)
                .await?;
        }
        debug!("response delivered");
        Ok(())
    }

    /// Logs an error event and forwards it to the system chat.
    ///
    /// Errors about the system chat itself are only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be sent.
    pub async fn on_error(&self, event: &ErrorEvent) -> Result<(), PlatformError> {
        warn!(chat_id = ?event.chat_id, error = %event.error, "relay error");

        let Some(system_chat) = &self.system_chat else {
            return Ok(());
        };
        if event.chat_id.as_ref() == Some(system_chat) {
            return Ok(());
        }

        let report = match &event.chat_id {
            Some(chat_id) => format!("Error in chat {chat_id}: {}", event.error),
            None => format!("Error: {}", event.error),
        };
        self.platform.send_text(system_chat, &report, None).await
    }
}
