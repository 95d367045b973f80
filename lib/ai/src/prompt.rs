//! Prompt templates.
//!
//! Placeholders use `{name}` syntax. `{{` and `}}` produce literal braces.

use crate::error::PromptError;
use std::collections::HashMap;

/// A named prompt with placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Template name, used in error messages.
    pub name: String,
    /// Template content with placeholders.
    pub content: String,
}

impl PromptTemplate {
    /// Creates a new prompt template.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Renders the template with the given variables.
    ///
    /// Variables that the template does not mention are ignored.
    ///
    /// # Errors
    ///
    /// - [`PromptError::MissingVariable`] if a placeholder has no value
    /// - [`PromptError::Malformed`] on an unclosed, empty or stray brace
    pub fn render(&self, variables: &HashMap<String, String>) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.content.len());
        let mut chars = self.content.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut variable = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        variable.push(inner);
                    }

                    if !closed || variable.is_empty() || variable.contains('{') {
                        return Err(self.malformed(position));
                    }

                    let value =
                        variables
                            .get(&variable)
                            .ok_or_else(|| PromptError::MissingVariable {
                                template: self.name.clone(),
                                variable: variable.clone(),
                            })?;
                    out.push_str(value);
                }
                '}' => return Err(self.malformed(position)),
                other => out.push(other),
            }
        }

        Ok(out)
    }

    fn malformed(&self, position: usize) -> PromptError {
        PromptError::Malformed {
            template: self.name.clone(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn substitutes_placeholders() {
        let template = PromptTemplate::new("base", "You are {name} in {chat}. {name}!");
        let rendered = template
            .render(&vars(&[("name", "Mibo"), ("chat", "Cats"), ("unused", "x")]))
            .expect("render");
        assert_eq!(rendered, "You are Mibo in Cats. Mibo!");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let template = PromptTemplate::new("json", "Reply as {{\"text\": \"{name}\"}}");
        let rendered = template.render(&vars(&[("name", "hi")])).expect("render");
        assert_eq!(rendered, "Reply as {\"text\": \"hi\"}");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let template = PromptTemplate::new("welcome", "Hello {chat}");
        let err = template.render(&HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingVariable {
                template: "welcome".to_string(),
                variable: "chat".to_string()
            }
        );
    }

    #[test]
    fn malformed_braces_are_rejected() {
        for content in ["open {name", "empty {}", "stray } brace"] {
            let err = PromptTemplate::new("bad", content)
                .render(&vars(&[("name", "x")]))
                .unwrap_err();
            assert!(matches!(err, PromptError::Malformed { .. }), "{content}");
        }
    }

    #[test]
    fn plain_text_renders_unchanged() {
        let template = PromptTemplate::new("plain", "no placeholders here");
        assert_eq!(
            template.render(&HashMap::new()).expect("render"),
            "no placeholders here"
        );
    }
}
