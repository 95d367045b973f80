//! Per-chat state held by the reference store.

use mibo_core::ChatId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Kind of chat on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one conversation with the bot.
    Private,
    /// Group or supergroup.
    Group,
    /// Broadcast channel.
    Channel,
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::Group => write!(f, "group"),
            Self::Channel => write!(f, "channel"),
        }
    }
}

/// A chat the relay is serving.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    pub chat_id: ChatId,
    pub name: String,
    pub kind: ChatKind,
    /// Percent chance of answering an unaddressed message, 0 to 100.
    pub chance: u8,
    /// Model override; `None` uses the default model.
    pub model: Option<String>,
    /// Assistant override; `None` uses the default assistant.
    pub assistant: Option<String>,
    /// Extra instructions rendered into the system prompt.
    pub custom_instructions: String,
    pub last_active: Instant,
    /// Cleared by an idle sweep, set again on access.
    pub in_use: bool,
}

impl ChatState {
    /// Creates the state for a newly seen chat.
    #[must_use]
    pub fn new(chat_id: ChatId, name: impl Into<String>, kind: ChatKind, chance: u8) -> Self {
        Self {
            chat_id,
            name: name.into(),
            kind,
            chance,
            model: None,
            assistant: None,
            custom_instructions: String::new(),
            last_active: Instant::now(),
            in_use: true,
        }
    }

    /// Marks the chat as just used.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
        self.in_use = true;
    }
}
