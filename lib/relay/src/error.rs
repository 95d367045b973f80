//! Error types for the relay crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `HistoryError`: History store operations
//! - `PlatformError`: Outbound delivery to the chat platform
//! - `RelayError`: Collaborator-level failures, wrapped in `Report` at
//!   handler boundaries

use mibo_core::ChatId;
use std::fmt;

/// Errors from history store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Failed to persist messages.
    SaveFailed { chat_id: ChatId, reason: String },
    /// Failed to load messages.
    LoadFailed { chat_id: ChatId, reason: String },
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SaveFailed { chat_id, reason } => {
                write!(f, "failed to save history for chat {chat_id}: {reason}")
            }
            Self::LoadFailed { chat_id, reason } => {
                write!(f, "failed to load history for chat {chat_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for HistoryError {}

/// Errors from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Sending a message failed.
    SendFailed { chat_id: ChatId, reason: String },
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed { chat_id, reason } => {
                write!(f, "failed to send to chat {chat_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for PlatformError {}

/// Collaborator-level relay errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The referenced model is not in the catalog.
    UnknownModel { id: String },
    /// The referenced assistant is not in the catalog.
    UnknownAssistant { id: String },
    /// The chat is not loaded.
    UnknownChat { chat_id: ChatId },
    /// A command had invalid arguments.
    InvalidCommand { command: String, reason: String },
    /// A prompt failed to render.
    Prompt { reason: String },
    /// The history store failed.
    History(HistoryError),
    /// The chat platform failed.
    Platform(PlatformError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModel { id } => write!(f, "unknown model: {id}"),
            Self::UnknownAssistant { id } => write!(f, "unknown assistant: {id}"),
            Self::UnknownChat { chat_id } => write!(f, "chat not loaded: {chat_id}"),
            Self::InvalidCommand { command, reason } => {
                write!(f, "invalid /{command}: {reason}")
            }
            Self::Prompt { reason } => write!(f, "prompt rendering failed: {reason}"),
            Self::History(e) => write!(f, "history error: {e}"),
            Self::Platform(e) => write!(f, "platform error: {e}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<HistoryError> for RelayError {
    fn from(e: HistoryError) -> Self {
        Self::History(e)
    }
}

impl From<PlatformError> for RelayError {
    fn from(e: PlatformError) -> Self {
        Self::Platform(e)
    }
}
