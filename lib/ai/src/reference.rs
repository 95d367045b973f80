//! Model, assistant and prompt references.
//!
//! References are the relay's static configuration: which models exist and
//! how to call them, which assistant personas exist, and their prompts.
//! Every field except `id` has a default, so a minimal record is just
//! `{"type": "model", "id": "gpt-4.1"}`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A language model and the parameters used to call it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReference {
    /// Model name sent to the provider.
    pub id: String,
    /// Provider endpoint override; empty uses the backend default.
    #[serde(default)]
    pub base_url: String,
    /// Whether the model runs on a local provider.
    #[serde(default)]
    pub local: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token ceiling of the conversation window for chats on this model.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default = "default_true")]
    pub penalty_supported: bool,
    #[serde(default = "default_penalty")]
    pub frequency_penalty: f32,
    #[serde(default = "default_penalty")]
    pub presence_penalty: f32,
    /// Whether this is a reasoning model.
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default = "default_true")]
    pub reasoning_effort_supported: bool,
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    /// Marker that ends the model's visible reasoning in its output.
    #[serde(default = "default_think_token")]
    pub think_token: String,
    /// Instruction appended to the system prompt to suppress reasoning.
    #[serde(default = "default_disable_thinking_token")]
    pub disable_thinking_token: String,
    #[serde(default)]
    pub disable_thinking: bool,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> usize {
    1000
}

fn default_max_response_tokens() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

fn default_penalty() -> f32 {
    0.1
}

fn default_reasoning_effort() -> String {
    "medium".to_string()
}

fn default_think_token() -> String {
    "</think>".to_string()
}

fn default_disable_thinking_token() -> String {
    "/no_think".to_string()
}

impl ModelReference {
    /// Creates a model reference with default parameters.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: String::new(),
            local: false,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_response_tokens: default_max_response_tokens(),
            penalty_supported: default_true(),
            frequency_penalty: default_penalty(),
            presence_penalty: default_penalty(),
            reasoning: false,
            reasoning_effort_supported: default_true(),
            reasoning_effort: default_reasoning_effort(),
            think_token: default_think_token(),
            disable_thinking_token: default_disable_thinking_token(),
            disable_thinking: false,
        }
    }

    /// Sets the window token ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Applies the thinking switch to a system prompt.
    #[must_use]
    pub fn system_prompt(&self, base: &str) -> String {
        if self.disable_thinking && !self.disable_thinking_token.is_empty() {
            format!("{base}\n{}", self.disable_thinking_token)
        } else {
            base.to_string()
        }
    }
}

/// Which prompt of an assistant to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    /// The system prompt for every completion.
    Base,
    /// Sent once when the assistant joins a group.
    Welcome,
    /// Sent when a private chat starts.
    Start,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Welcome => write!(f, "welcome"),
            Self::Start => write!(f, "start"),
        }
    }
}

/// An assistant persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReference {
    pub id: String,
    /// Names the assistant answers to. Empty means the title-cased id.
    #[serde(default)]
    pub names: Vec<String>,
    /// Prompt identifiers by kind.
    #[serde(default, alias = "chat_event_prompt_idx")]
    pub prompts: HashMap<PromptKind, String>,
}

impl AssistantReference {
    /// Creates an assistant with no prompts.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let mut assistant = Self {
            id: id.into(),
            names: Vec::new(),
            prompts: HashMap::new(),
        };
        assistant.fill_default_names();
        assistant
    }

    /// Adds a name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Maps a prompt kind to a prompt identifier.
    #[must_use]
    pub fn with_prompt(mut self, kind: PromptKind, prompt_id: impl Into<String>) -> Self {
        self.prompts.insert(kind, prompt_id.into());
        self
    }

    /// The name used when the assistant speaks.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.names.first().map_or(self.id.as_str(), String::as_str)
    }

    pub(crate) fn fill_default_names(&mut self) {
        if self.names.is_empty() {
            self.names.push(title_case(&self.id));
        }
    }
}

/// A prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptReference {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
}

impl PromptReference {
    /// Creates a prompt reference.
    #[must_use]
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
        }
    }
}

/// Uppercases the first letter of every word and lowercases the rest.
fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for c in raw.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
