//! Reference catalog loading.
//!
//! The catalog is a JSON array of tagged records:
//!
//! ```json
//! [
//!   {"type": "model", "id": "gpt-4.1", "max_tokens": 3000},
//!   {"type": "assistant", "id": "default", "prompts": {"base": "base"}},
//!   {"type": "prompt", "id": "base", "prompt": "You are {name}."}
//! ]
//! ```
//!
//! Records of an unknown type are skipped with a warning.

use crate::error::ReferenceError;
use crate::reference::{AssistantReference, ModelReference, PromptKind, PromptReference};
use rootcause::prelude::Report;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// All references known to the relay, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    models: HashMap<String, ModelReference>,
    assistants: HashMap<String, AssistantReference>,
    prompts: HashMap<String, PromptReference>,
}

impl ReferenceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid catalog.
    pub fn load(path: &Path) -> Result<Self, Report<ReferenceError>> {
        let raw = std::fs::read_to_string(path).map_err(|e| ReferenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let catalog = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            models = catalog.models.len(),
            assistants = catalog.assistants.len(),
            prompts = catalog.prompts.len(),
            "loaded references"
        );
        Ok(catalog)
    }

    /// Parses a catalog document.
    ///
    /// # Errors
    ///
    /// - [`ReferenceError::Parse`] if the document is not a JSON array or a
    ///   record does not fit its type
    /// - [`ReferenceError::MissingId`] if a known record has no `id`
    pub fn from_json(raw: &str) -> Result<Self, ReferenceError> {
        let records: Vec<JsonValue> =
            serde_json::from_str(raw).map_err(|e| ReferenceError::Parse {
                reason: e.to_string(),
            })?;

        let mut catalog = Self::new();
        for (index, mut record) in records.into_iter().enumerate() {
            let kind = record
                .get("type")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();

            match kind.as_str() {
                "model" => {
                    let model: ModelReference = parse_record(&kind, index, &mut record)?;
                    catalog.models.insert(model.id.clone(), model);
                }
                "assistant" => {
                    let mut assistant: AssistantReference =
                        parse_record(&kind, index, &mut record)?;
                    assistant.fill_default_names();
                    catalog.assistants.insert(assistant.id.clone(), assistant);
                }
                "prompt" => {
                    let prompt: PromptReference = parse_record(&kind, index, &mut record)?;
                    catalog.prompts.insert(prompt.id.clone(), prompt);
                }
                other => {
                    warn!(index, kind = other, "skipping reference of unknown type");
                }
            }
        }
        Ok(catalog)
    }

    /// Adds or replaces a model.
    #[must_use]
    pub fn with_model(mut self, model: ModelReference) -> Self {
        self.models.insert(model.id.clone(), model);
        self
    }

    /// Adds or replaces an assistant.
    #[must_use]
    pub fn with_assistant(mut self, assistant: AssistantReference) -> Self {
        self.assistants.insert(assistant.id.clone(), assistant);
        self
    }

    /// Adds or replaces a prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptReference) -> Self {
        self.prompts.insert(prompt.id.clone(), prompt);
        self
    }

    #[must_use]
    pub fn model(&self, id: &str) -> Option<&ModelReference> {
        self.models.get(id)
    }

    #[must_use]
    pub fn assistant(&self, id: &str) -> Option<&AssistantReference> {
        self.assistants.get(id)
    }

    #[must_use]
    pub fn prompt(&self, id: &str) -> Option<&PromptReference> {
        self.prompts.get(id)
    }

    /// Resolves an assistant's prompt of the given kind.
    #[must_use]
    pub fn assistant_prompt(&self, assistant: &str, kind: PromptKind) -> Option<&PromptReference> {
        let prompt_id = self.assistants.get(assistant)?.prompts.get(&kind)?;
        self.prompts.get(prompt_id)
    }
}

/// Deserializes one record, normalizing a numeric `id` to a string.
fn parse_record<T: DeserializeOwned>(
    kind: &str,
    index: usize,
    record: &mut JsonValue,
) -> Result<T, ReferenceError> {
    let id = match record.get("id") {
        None | Some(JsonValue::Null) => {
            return Err(ReferenceError::MissingId {
                kind: kind.to_string(),
                index,
            });
        }
        Some(JsonValue::String(_)) => None,
        Some(other) => Some(JsonValue::String(other.to_string())),
    };
    if let (Some(id), Some(fields)) = (id, record.as_object_mut()) {
        fields.insert("id".to_string(), id);
    }

    serde_json::from_value(record.take()).map_err(|e| ReferenceError::Parse {
        reason: format!("{kind} reference at index {index}: {e}"),
    })
}
