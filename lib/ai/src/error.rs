//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `LlmError`: Low-level LLM backend operations
//! - `PromptError`: Prompt template rendering
//! - `ReferenceError`: Loading the reference catalog

use std::fmt;

/// Errors from LLM backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Provider is unavailable.
    ProviderUnavailable { provider: String, reason: String },
    /// Request failed.
    RequestFailed { reason: String },
    /// Provider answered with a non-success status.
    Status { status: u16, body: String },
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// Provider returned no choices.
    EmptyResponse,
    /// Timeout waiting for response.
    Timeout,
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::Status { status, body } => {
                write!(f, "LLM provider returned {status}: {body}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::EmptyResponse => write!(f, "LLM response contained no choices"),
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from prompt operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// A placeholder had no value.
    MissingVariable { template: String, variable: String },
    /// Unbalanced or empty braces.
    Malformed { template: String, position: usize },
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVariable { template, variable } => {
                write!(
                    f,
                    "missing required variable '{variable}' in template '{template}'"
                )
            }
            Self::Malformed { template, position } => {
                write!(
                    f,
                    "malformed placeholder at byte {position} in template '{template}'"
                )
            }
        }
    }
}

impl std::error::Error for PromptError {}

/// Errors from loading references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The reference file could not be read.
    Io { path: String, reason: String },
    /// The document or a record is not valid JSON for its type.
    Parse { reason: String },
    /// A record has no `id`.
    MissingId { kind: String, index: usize },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => {
                write!(f, "failed to read references from {path}: {reason}")
            }
            Self::Parse { reason } => write!(f, "invalid references: {reason}"),
            Self::MissingId { kind, index } => {
                write!(f, "{kind} reference at index {index} has no id")
            }
        }
    }
}

impl std::error::Error for ReferenceError {}
