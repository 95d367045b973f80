//! Message types for conversations.

use chrono::{DateTime, Utc};
use mibo_core::MessageId;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User/human message.
    User,
    /// Assistant/AI message.
    Assistant,
    /// System message.
    System,
}

impl MessageRole {
    /// Returns the wire label used by chat-completion providers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sticker reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sticker {
    /// The emoji the sticker stands for.
    pub emoji: String,
    /// Name of the sticker pack.
    pub pack: String,
}

/// The content of a message. Any combination of parts may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Text or caption.
    pub text: Option<String>,
    /// Sticker, if the message was one.
    pub sticker: Option<Sticker>,
    /// Local path or URL of an attached image.
    pub image: Option<String>,
}

impl Content {
    /// Text content, or the empty string.
    #[must_use]
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// A message in a conversation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform message identifier.
    pub id: MessageId,
    /// Message role.
    pub role: MessageRole,
    /// Display name of the sender.
    pub user: String,
    /// Message content.
    pub content: Content,
    /// The message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a text message with a freshly generated identifier.
    #[must_use]
    pub fn new(role: MessageRole, user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(Ulid::new()),
            role,
            user: user.into(),
            content: Content {
                text: Some(text.into()),
                ..Content::default()
            },
            reply_to: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, user, text)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, name, text)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, "system", text)
    }

    /// Replaces the generated identifier with a platform one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Attaches an image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.content.image = Some(image.into());
        self
    }

    /// Attaches a sticker.
    #[must_use]
    pub fn with_sticker(mut self, sticker: Sticker) -> Self {
        self.content.sticker = Some(sticker);
        self
    }

    /// Marks this message as a reply.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<MessageId>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Returns the text content, or the empty string.
    #[must_use]
    pub fn text(&self) -> &str {
        self.content.text_or_empty()
    }

    /// Renders the message as a transcript line, `"{user}: {text}"`.
    ///
    /// A sticker without text renders as its emoji.
    #[must_use]
    pub fn transcript_line(&self) -> String {
        let body = match (&self.content.text, &self.content.sticker) {
            (Some(text), _) => text.as_str(),
            (None, Some(sticker)) => sticker.emoji.as_str(),
            (None, None) => "",
        };
        format!("{}: {}", self.user, body)
    }
}
