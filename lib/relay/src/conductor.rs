//! Inbound message routing.
//!
//! The conductor turns platform-neutral [`MessageArrived`] events into
//! window entries, decides whether the assistant should answer, and asks for
//! a completion when it should.

use crate::chat::{ChatKind, ChatState};
use crate::error::RelayError;
use crate::events::{
    AssistantResponse, CommandIssued, CompletionRequested, MessageArrived, MessagesStored,
    NewChat, StoredMessage,
};
use crate::refs::{RefStore, SharedWindow, lock_window};
use chrono::Utc;
use mibo_ai::{AssistantReference, PromptKind, PromptTemplate};
use mibo_bus::{EventBus, HandlerError, HandlerId};
use mibo_conversation::{Message, Tokenizer, message_cost};
use mibo_core::MessageId;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};
use ulid::Ulid;

/// Source of chance rolls in `1..=100`.
pub type Roll = Arc<dyn Fn() -> u8 + Send + Sync>;

fn random_roll() -> u8 {
    // Ulid randomness is 80 bits; the remainder fits in a u8.
    (Ulid::new().random() % 100) as u8 + 1
}

/// Routes inbound messages and commands.
pub struct Conductor {
    bus: EventBus,
    refs: Arc<RefStore>,
    tokenizer: Arc<dyn Tokenizer>,
    /// Bot username without the `@`. Empty disables mention pings.
    bot_username: String,
    roll: Roll,
}

impl Conductor {
    /// Creates a conductor with random chance rolls.
    #[must_use]
    pub fn new(
        bus: EventBus,
        refs: Arc<RefStore>,
        tokenizer: Arc<dyn Tokenizer>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            refs,
            tokenizer,
            bot_username: bot_username.into(),
            roll: Arc::new(random_roll),
        }
    }

    /// Replaces the chance roll.
    #[must_use]
    pub fn with_roll(mut self, roll: impl Fn() -> u8 + Send + Sync + 'static) -> Self {
        self.roll = Arc::new(roll);
        self
    }

    /// Subscribes the conductor to its events.
    pub fn register(self: &Arc<Self>) -> Vec<HandlerId> {
        let on_message = Arc::clone(self);
        let on_command = Arc::clone(self);
        let on_new_chat = Arc::clone(self);
        vec![
            self.bus.register(move |event: Arc<MessageArrived>| {
                let conductor = Arc::clone(&on_message);
                async move {
                    conductor
                        .on_message(&event)
                        .await
                        .map_err(HandlerError::from_display)
                }
            }),
            self.bus.register(move |event: Arc<CommandIssued>| {
                let conductor = Arc::clone(&on_command);
                async move {
                    conductor
                        .on_command(&event)
                        .await
                        .map_err(HandlerError::from_display)
                }
            }),
            self.bus.register(move |event: Arc<NewChat>| {
                let conductor = Arc::clone(&on_new_chat);
                async move {
                    conductor
                        .on_new_chat(&event)
                        .await
                        .map_err(HandlerError::from_display)
                }
            }),
        ]
    }

    /// Whether `event` addresses the assistant directly.
    ///
    /// Forwarded messages never do. Private and system chats always do.
    /// Otherwise a mention of the bot, a reply to the bot, or one of the
    /// assistant's names in the text counts.
    #[must_use]
    pub fn is_ping(&self, event: &MessageArrived, names: &[String]) -> bool {
        if event.forwarded {
            return false;
        }
        if event.chat_kind == ChatKind::Private || event.system {
            return true;
        }
        if !self.bot_username.is_empty()
            && event
                .mentions
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&self.bot_username))
        {
            return true;
        }
        if event.reply_to_bot {
            return true;
        }

        let text = event.text.as_deref().unwrap_or_default().to_lowercase();
        names
            .iter()
            .filter(|name| !name.is_empty())
            .any(|name| text.contains(&name.to_lowercase()))
    }

    /// Records an inbound message and requests a completion if warranted.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat's model or assistant cannot be resolved
    /// or the base prompt fails to render.
    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, message_id = %event.message_id))]
    pub async fn on_message(&self, event: &MessageArrived) -> Result<(), Report<RelayError>> {
        let state = self
            .refs
            .chat(&event.chat_id, &event.chat_name, event.chat_kind)
            .await;
        let names = self.refs.assistant_names(&event.chat_id);
        let ping = self.is_ping(event, &names);
        let window = self.refs.window(&event.chat_id).await?;

        let mut message = Message::user(
            event.sender.clone(),
            event.text.clone().unwrap_or_default(),
        )
        .with_id(event.message_id.clone());
        if event.text.is_none() {
            message.content.text = None;
        }
        if let Some(reply_to) = &event.reply_to {
            message = message.with_reply_to(reply_to.clone());
        }
        if let Some(image) = event.images.first() {
            message = message.with_image(image.clone());
        }
        let cost = message_cost(self.tokenizer.as_ref(), &message);

        {
            let mut window = lock_window(&window);
            window.add(message.clone(), cost);
            for image in &event.images {
                window.add_image_url(image.clone());
            }
        }

        self.bus
            .emit(MessagesStored::new(
                event.chat_id.clone(),
                vec![StoredMessage::new(message, cost)],
            ))
            .await;

        if !ping {
            let roll = (self.roll)();
            if roll > state.chance {
                trace!(roll, chance = state.chance, "chance roll missed");
                return Ok(());
            }
            debug!(roll, chance = state.chance, "chance roll hit");
        }

        self.request_completion(&state, &window, Some(event.message_id.clone()))
            .await
    }

    /// Handles `/clear` and `/chance <n>`. Other commands are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures unrelated to user input. Bad
    /// arguments are answered with a usage notice.
    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, command = %event.command))]
    pub async fn on_command(&self, event: &CommandIssued) -> Result<(), Report<RelayError>> {
        self.refs
            .chat(&event.chat_id, &event.chat_name, event.chat_kind)
            .await;

        let notice = match event.command.as_str() {
            "clear" => {
                self.refs.clear_window(&event.chat_id);
                info!("window cleared");
                "Context cleared.".to_string()
            }
            "chance" => {
                let parsed = event
                    .args
                    .first()
                    .and_then(|arg| arg.trim_end_matches('%').parse::<u8>().ok());
                match parsed.map(|chance| self.refs.set_chance(&event.chat_id, chance)) {
                    Some(Ok(())) => {
                        let chance = parsed.unwrap_or_default();
                        info!(chance, "chance updated");
                        format!("Chance set to {chance}%.")
                    }
                    Some(Err(RelayError::UnknownChat { chat_id })) => {
                        return Err(RelayError::UnknownChat { chat_id }.into());
                    }
                    Some(Err(_)) | None => "Usage: /chance <0-100>".to_string(),
                }
            }
            other => {
                debug!(command = other, "ignoring unknown command");
                return Ok(());
            }
        };

        self.bus
            .emit(AssistantResponse::notice(event.chat_id.clone(), notice))
            .await;
        Ok(())
    }

    /// Greets a new chat with the assistant's welcome or start prompt.
    ///
    /// Groups get the welcome prompt and private chats the start prompt.
    /// Nothing happens if the assistant has no such prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if references cannot be resolved or a prompt fails
    /// to render.
    #[instrument(skip(self, event), fields(chat_id = %event.chat_id, kind = %event.kind))]
    pub async fn on_new_chat(&self, event: &NewChat) -> Result<(), Report<RelayError>> {
        let kind = match event.kind {
            ChatKind::Group => PromptKind::Welcome,
            ChatKind::Private => PromptKind::Start,
            ChatKind::Channel => return Ok(()),
        };
        let Some(state) = self.refs.chat_state(&event.chat_id) else {
            return Ok(());
        };
        let assistant = self.refs.assistant_for(&event.chat_id)?;
        let Some(greeting) = self.render(&assistant, kind, &state)? else {
            debug!(prompt = %kind, "assistant has no greeting prompt");
            return Ok(());
        };

        let window = self.refs.window(&event.chat_id).await?;
        let message = Message::system(greeting);
        let cost = message_cost(self.tokenizer.as_ref(), &message);
        lock_window(&window).add(message.clone(), cost);
        self.bus
            .emit(MessagesStored::new(
                event.chat_id.clone(),
                vec![StoredMessage::new(message, cost)],
            ))
            .await;

        info!(prompt = %kind, "greeting new chat");
        self.request_completion(&state, &window, None).await
    }

    async fn request_completion(
        &self,
        state: &ChatState,
        window: &SharedWindow,
        reply_to: Option<MessageId>,
    ) -> Result<(), Report<RelayError>> {
        let model = self.refs.model_for(&state.chat_id)?;
        let assistant = self.refs.assistant_for(&state.chat_id)?;
        let system_prompt = self
            .render(&assistant, PromptKind::Base, state)?
            .unwrap_or_default();

        let (context, images) = {
            let window = lock_window(window);
            (window.process_context(), window.image_urls())
        };

        debug!(messages = context.len(), images = images.len(), "requesting completion");
        self.bus
            .emit(
                CompletionRequested::new(
                    state.chat_id.clone(),
                    model.id,
                    assistant.id,
                    system_prompt,
                    context,
                )
                .with_images(images)
                .with_reply_to(reply_to),
            )
            .await;
        Ok(())
    }

    /// Renders one of the assistant's prompts for a chat.
    fn render(
        &self,
        assistant: &AssistantReference,
        kind: PromptKind,
        state: &ChatState,
    ) -> Result<Option<String>, RelayError> {
        let Some(prompt) = self.refs.catalog().assistant_prompt(&assistant.id, kind) else {
            return Ok(None);
        };

        let variables = HashMap::from([
            ("name".to_string(), assistant.display_name().to_string()),
            ("chat".to_string(), state.name.clone()),
            ("instructions".to_string(), state.custom_instructions.clone()),
            (
                "current_date_utc".to_string(),
                Utc::now().format("%Y/%m/%d, %A").to_string(),
            ),
        ]);

        PromptTemplate::new(prompt.id.clone(), prompt.prompt.clone())
            .render(&variables)
            .map(Some)
            .map_err(|e| RelayError::Prompt {
                reason: e.to_string(),
            })
    }
}
