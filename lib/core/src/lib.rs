//! Core types shared by every mibo crate.
//!
//! Two kinds of identifiers live here:
//!
//! - **Generated ids** (`EventId`): ULIDs minted by this process.
//! - **Platform ids** (`ChatId`, `MessageId`): strings handed to us by the
//!   messaging platform, normalized so that `42`, `"42"` and
//!   `String::from("42")` compare equal.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ChatId, EventId, MessageId, ParseIdError};
