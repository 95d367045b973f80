//! LLM backend abstraction.
//!
//! Provides a unified interface for chat-completion providers.

use crate::error::LlmError;
use crate::reference::ModelReference;
use async_trait::async_trait;
use mibo_conversation::{ContextEntry, MessageRole};
use serde::{Deserialize, Serialize};

/// A chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Model identifier.
    pub model: String,
    /// Provider endpoint override.
    pub base_url: Option<String>,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Conversation context, oldest first.
    pub messages: Vec<LlmMessage>,
    /// Image references attached to the last user turn.
    pub images: Vec<String>,
    /// Temperature for sampling.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub reasoning_effort: Option<String>,
}

impl LlmRequest {
    /// Creates a bare request for `model`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: None,
            system: None,
            messages: Vec::new(),
            images: Vec::new(),
            temperature: None,
            max_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            reasoning_effort: None,
        }
    }

    /// Creates a request carrying the parameters a model supports.
    ///
    /// Penalties are set only when the model supports them. Reasoning
    /// effort is set only for reasoning models that accept it.
    #[must_use]
    pub fn for_model(model: &ModelReference) -> Self {
        let mut request = Self::new(&model.id)
            .with_temperature(model.temperature)
            .with_max_tokens(model.max_response_tokens);

        if !model.base_url.is_empty() {
            request.base_url = Some(model.base_url.clone());
        }
        if model.penalty_supported {
            request.frequency_penalty = Some(model.frequency_penalty);
            request.presence_penalty = Some(model.presence_penalty);
        }
        if model.reasoning && model.reasoning_effort_supported {
            request.reasoning_effort = Some(model.reasoning_effort.clone());
        }
        request
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the context messages.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<LlmMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Attaches image references.
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
}

impl LlmMessage {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<ContextEntry> for LlmMessage {
    fn from(entry: ContextEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.text,
        }
    }
}

/// A response from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for LLM backends.
///
/// This trait defines the interface that all LLM providers must implement.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates a response for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Returns the provider name, for logs.
    fn provider(&self) -> &str;
}
