//! AI primitives for the mibo relay.
//!
//! This crate provides:
//!
//! - **References**: models, assistant personas and prompts, loaded from a
//!   JSON catalog
//! - **Prompt templates**: `{name}` placeholder rendering
//! - **LLM backend**: the provider-neutral chat-completion interface

pub mod backend;
pub mod catalog;
pub mod error;
pub mod prompt;
pub mod reference;

pub use backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, TokenUsage};
pub use catalog::ReferenceCatalog;
pub use error::{LlmError, PromptError, ReferenceError};
pub use prompt::PromptTemplate;
pub use reference::{AssistantReference, ModelReference, PromptKind, PromptReference};
