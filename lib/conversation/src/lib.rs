//! Conversation window for the mibo relay.
//!
//! This crate provides:
//!
//! - **Message**: platform-neutral chat messages with text, sticker and image parts
//! - **Window**: a token-budgeted, oldest-first-evicting view of recent history
//! - **Tokenizer**: token cost estimation for window budgeting

pub mod message;
pub mod tokenizer;
pub mod window;

pub use message::{Content, Message, MessageRole, Sticker};
pub use tokenizer::{HeuristicTokenizer, Tokenizer, image_token_cost, message_cost};
pub use window::{ContextEntry, Window, WindowConfig};
