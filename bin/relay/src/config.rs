//! Relay configuration, loaded via the `config` crate from environment
//! variables. Nested keys use `__`, so `LLM__API_KEY` sets `llm.api_key`.

use mibo_relay::RefSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Model used by chats without an override.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Assistant used by chats without an override.
    #[serde(default = "default_assistant")]
    pub default_assistant: String,

    /// Percent chance of answering unaddressed group messages in new chats.
    #[serde(default = "default_chance")]
    pub default_chance: u8,

    /// Idle minutes before a chat and its window leave memory.
    #[serde(default = "default_chat_ttl_minutes")]
    pub chat_ttl_minutes: u64,

    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Deadline for loading a chat's history.
    #[serde(default = "default_memory_timeout_seconds")]
    pub memory_timeout_seconds: u64,

    /// Image references kept per window.
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// JSON file holding model, assistant and prompt references.
    #[serde(default = "default_references_path")]
    pub references_path: PathBuf,

    /// Bot username without the `@`.
    #[serde(default)]
    pub bot_username: String,

    /// Operator chat that receives error reports.
    #[serde(default)]
    pub system_chat: Option<String>,

    /// Sender name for console input.
    #[serde(default = "default_console_user")]
    pub console_user: String,

    #[serde(default)]
    pub llm: LlmConfig,
}

/// Chat-completion provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_assistant() -> String {
    "default".to_string()
}

fn default_chance() -> u8 {
    5
}

fn default_chat_ttl_minutes() -> u64 {
    60
}

fn default_cleanup_interval_seconds() -> u64 {
    30
}

fn default_memory_timeout_seconds() -> u64 {
    5
}

fn default_max_images() -> usize {
    3
}

fn default_references_path() -> PathBuf {
    PathBuf::from("env/references.json")
}

fn default_console_user() -> String {
    "you".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_assistant: default_assistant(),
            default_chance: default_chance(),
            chat_ttl_minutes: default_chat_ttl_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            memory_timeout_seconds: default_memory_timeout_seconds(),
            max_images: default_max_images(),
            references_path: default_references_path(),
            bot_username: String::new(),
            system_chat: None,
            console_user: default_console_user(),
            llm: LlmConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Settings for the reference store.
    #[must_use]
    pub fn ref_settings(&self) -> RefSettings {
        RefSettings {
            default_model: self.default_model.clone(),
            default_assistant: self.default_assistant.clone(),
            default_chance: self.default_chance.min(100),
            chat_ttl: Duration::from_secs(self.chat_ttl_minutes * 60),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_seconds.max(1)),
            memory_timeout: Duration::from_secs(self.memory_timeout_seconds),
            max_images: self.max_images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_input() {
        let config: RelayConfig = serde_json::from_str("{}").expect("config");
        assert_eq!(config.default_model, "gpt-4.1");
        assert_eq!(config.default_chance, 5);
        assert_eq!(config.references_path, PathBuf::from("env/references.json"));
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.timeout_seconds, 60);
        assert!(config.system_chat.is_none());
    }

    #[test]
    fn overrides_are_deserialized() {
        let config: RelayConfig = config::Config::builder()
            .set_override("default_chance", 40)
            .and_then(|b| b.set_override("chat_ttl_minutes", 10))
            .and_then(|b| b.set_override("llm.api_key", "sk-test"))
            .expect("overrides")
            .build()
            .expect("build")
            .try_deserialize()
            .expect("config");

        assert_eq!(config.default_chance, 40);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.timeout_seconds, 60);

        let settings = config.ref_settings();
        assert_eq!(settings.default_chance, 40);
        assert_eq!(settings.chat_ttl, Duration::from_secs(600));
        assert_eq!(settings.memory_timeout, Duration::from_secs(5));
    }

    #[test]
    fn chance_is_capped() {
        let config = RelayConfig {
            default_chance: 250,
            ..RelayConfig::default()
        };
        assert_eq!(config.ref_settings().default_chance, 100);
    }
}
