//! Events exchanged by the relay's collaborators.
//!
//! ```text
//! MessageArrived ──► Conductor ──► MessagesStored ──► Database
//!                        │
//!                        └──► CompletionRequested ──► Assistant ──► AssistantResponse ──► Delivery
//!
//! RefStore ──wait──► MemoryRequest ──► Database ──► MemoryResponse
//! ```

use crate::chat::ChatKind;
use mibo_bus::{ChatId, Event, EventId, impl_event};
use mibo_conversation::{ContextEntry, Message};
use mibo_core::MessageId;

/// A message together with its precomputed token cost.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message: Message,
    pub tokens: usize,
}

impl StoredMessage {
    #[must_use]
    pub fn new(message: Message, tokens: usize) -> Self {
        Self { message, tokens }
    }
}

/// A platform-neutral inbound chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageArrived {
    pub id: EventId,
    pub chat_id: ChatId,
    pub chat_name: String,
    pub chat_kind: ChatKind,
    pub message_id: MessageId,
    /// Display name of the sender.
    pub sender: String,
    pub text: Option<String>,
    /// Local paths or URLs of attached images.
    pub images: Vec<String>,
    /// The message this one replies to.
    pub reply_to: Option<MessageId>,
    /// Whether `reply_to` points at one of the bot's messages.
    pub reply_to_bot: bool,
    /// Usernames mentioned with `@`, without the `@`.
    pub mentions: Vec<String>,
    pub forwarded: bool,
    /// Sent in the operator's system chat.
    pub system: bool,
}

impl MessageArrived {
    /// Creates a plain text message.
    #[must_use]
    pub fn new(
        chat_id: impl Into<ChatId>,
        chat_name: impl Into<String>,
        chat_kind: ChatKind,
        message_id: impl Into<MessageId>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            chat_id: chat_id.into(),
            chat_name: chat_name.into(),
            chat_kind,
            message_id: message_id.into(),
            sender: sender.into(),
            text: Some(text.into()),
            images: Vec::new(),
            reply_to: None,
            reply_to_bot: false,
            mentions: Vec::new(),
            forwarded: false,
            system: false,
        }
    }

    /// Attaches an image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    /// Records an `@` mention.
    #[must_use]
    pub fn with_mention(mut self, username: impl Into<String>) -> Self {
        self.mentions.push(username.into());
        self
    }

    /// Marks this message as a reply.
    #[must_use]
    pub fn replying_to(mut self, message_id: impl Into<MessageId>, to_bot: bool) -> Self {
        self.reply_to = Some(message_id.into());
        self.reply_to_bot = to_bot;
        self
    }

    /// Marks this message as forwarded.
    #[must_use]
    pub fn forwarded(mut self) -> Self {
        self.forwarded = true;
        self
    }
}

impl_event!(MessageArrived, chat);

/// A slash command sent in a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandIssued {
    pub id: EventId,
    pub chat_id: ChatId,
    pub chat_name: String,
    pub chat_kind: ChatKind,
    /// Command name without the leading slash.
    pub command: String,
    pub args: Vec<String>,
}

impl CommandIssued {
    /// Parses `"/name arg1 arg2"`. Returns `None` if `line` is not a command.
    ///
    /// A `@botname` suffix on the command is dropped.
    #[must_use]
    pub fn parse(
        chat_id: impl Into<ChatId>,
        chat_name: impl Into<String>,
        chat_kind: ChatKind,
        line: &str,
    ) -> Option<Self> {
        let mut words = line.trim().strip_prefix('/')?.split_whitespace();
        let head = words.next()?;
        let command = head.split('@').next().unwrap_or(head).to_lowercase();
        if command.is_empty() {
            return None;
        }

        Some(Self {
            id: EventId::new(),
            chat_id: chat_id.into(),
            chat_name: chat_name.into(),
            chat_kind,
            command,
            args: words.map(str::to_string).collect(),
        })
    }
}

impl_event!(CommandIssued, chat);

/// Published when the relay sees a chat for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub id: EventId,
    pub chat_id: ChatId,
    pub name: String,
    pub kind: ChatKind,
}

impl NewChat {
    #[must_use]
    pub fn new(chat_id: ChatId, name: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            name: name.into(),
            kind,
        }
    }
}

impl_event!(NewChat, chat);

/// Messages that entered a chat's window and should be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagesStored {
    pub id: EventId,
    pub chat_id: ChatId,
    pub messages: Vec<StoredMessage>,
}

impl MessagesStored {
    #[must_use]
    pub fn new(chat_id: ChatId, messages: Vec<StoredMessage>) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            messages,
        }
    }
}

impl_event!(MessagesStored, chat);

/// Asks the history store for a chat's recent messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRequest {
    pub id: EventId,
    pub chat_id: ChatId,
    /// Token budget for the returned history.
    pub max_tokens: usize,
}

impl MemoryRequest {
    #[must_use]
    pub fn new(chat_id: ChatId, max_tokens: usize) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            max_tokens,
        }
    }
}

impl_event!(MemoryRequest, chat);

/// History returned for a [`MemoryRequest`], oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryResponse {
    pub id: EventId,
    pub chat_id: ChatId,
    pub messages: Vec<StoredMessage>,
}

impl MemoryResponse {
    /// Creates the response correlated to `request`.
    #[must_use]
    pub fn reply_to(request: &MemoryRequest, messages: Vec<StoredMessage>) -> Self {
        Self {
            id: request.correlation_id(),
            chat_id: request.chat_id.clone(),
            messages,
        }
    }
}

impl_event!(MemoryResponse, chat);

/// Asks the assistant for a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequested {
    pub id: EventId,
    pub chat_id: ChatId,
    /// Model reference id.
    pub model: String,
    /// Assistant reference id.
    pub assistant: String,
    /// Rendered system prompt.
    pub system_prompt: String,
    pub context: Vec<ContextEntry>,
    pub images: Vec<String>,
    /// Message the reply should quote.
    pub reply_to: Option<MessageId>,
}

impl CompletionRequested {
    #[must_use]
    pub fn new(
        chat_id: ChatId,
        model: impl Into<String>,
        assistant: impl Into<String>,
        system_prompt: impl Into<String>,
        context: Vec<ContextEntry>,
    ) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            model: model.into(),
            assistant: assistant.into(),
            system_prompt: system_prompt.into(),
            context,
            images: Vec::new(),
            reply_to: None,
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: Option<MessageId>) -> Self {
        self.reply_to = reply_to;
        self
    }
}

impl_event!(CompletionRequested, chat);

/// Text the bot should send to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantResponse {
    pub id: EventId,
    pub chat_id: ChatId,
    /// Separate outgoing messages, in order.
    pub messages: Vec<String>,
    pub reply_to: Option<MessageId>,
    /// Whether this is a fallback after a failure.
    pub fallback: bool,
}

impl AssistantResponse {
    /// Creates the response correlated to `request`.
    #[must_use]
    pub fn reply_to(request: &CompletionRequested, messages: Vec<String>) -> Self {
        Self {
            id: request.correlation_id(),
            chat_id: request.chat_id.clone(),
            messages,
            reply_to: request.reply_to.clone(),
            fallback: false,
        }
    }

    /// Creates a standalone notice, such as a command acknowledgement.
    #[must_use]
    pub fn notice(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            messages: vec![text.into()],
            reply_to: None,
            fallback: false,
        }
    }
}

impl_event!(AssistantResponse, chat);

/// A failure worth reporting to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub id: EventId,
    pub chat_id: Option<ChatId>,
    pub error: String,
}

impl ErrorEvent {
    #[must_use]
    pub fn new(chat_id: Option<ChatId>, error: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            chat_id,
            error: error.into(),
        }
    }
}

impl Event for ErrorEvent {
    fn correlation_id(&self) -> EventId {
        self.id
    }

    fn chat_id(&self) -> Option<&ChatId> {
        self.chat_id.as_ref()
    }
}

/// Asks the process to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequested {
    pub id: EventId,
    pub reason: String,
}

impl ShutdownRequested {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            reason: reason.into(),
        }
    }
}

impl_event!(ShutdownRequested);
