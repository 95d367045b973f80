//! OpenAI-compatible chat-completions backend.

use crate::config::LlmConfig;
use async_trait::async_trait;
use base64::Engine;
use mibo_ai::{LlmBackend, LlmError, LlmRequest, LlmResponse, TokenUsage};
use mibo_conversation::MessageRole;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Calls `POST {base_url}/chat/completions`.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiBackend {
    /// Creates the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    fn endpoint(&self, request: &LlmRequest) -> String {
        let base = request
            .base_url
            .as_deref()
            .map_or(self.base_url.as_str(), |url| url.trim_end_matches('/'));
        format!("{base}/chat/completions")
    }

    /// Builds the JSON request body.
    ///
    /// Images are attached to the last user message.
    pub async fn body(&self, request: &LlmRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }

        let last_user = request
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::User);
        let mut image_parts = Vec::new();
        for reference in &request.images {
            if let Some(url) = image_url(reference).await {
                image_parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
            }
        }

        for (index, message) in request.messages.iter().enumerate() {
            let content = if Some(index) == last_user && !image_parts.is_empty() {
                let mut parts = vec![json!({ "type": "text", "text": message.content })];
                parts.append(&mut image_parts);
                Value::Array(parts)
            } else {
                Value::String(message.content.clone())
            };
            messages.push(json!({ "role": message.role.as_str(), "content": content }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Value::Object(map) = &mut body {
            if let Some(temperature) = request.temperature {
                map.insert("temperature".to_string(), json!(temperature));
            }
            if let Some(max_tokens) = request.max_tokens {
                map.insert("max_tokens".to_string(), json!(max_tokens));
            }
            if let Some(penalty) = request.frequency_penalty {
                map.insert("frequency_penalty".to_string(), json!(penalty));
            }
            if let Some(penalty) = request.presence_penalty {
                map.insert("presence_penalty".to_string(), json!(penalty));
            }
            if let Some(effort) = &request.reasoning_effort {
                map.insert("reasoning_effort".to_string(), json!(effort));
            }
        }
        body
    }
}

/// Resolves an image reference to something the API accepts.
///
/// URLs pass through. Local files are inlined as base64 data URIs.
/// Unreadable files are skipped.
async fn image_url(reference: &str) -> Option<String> {
    if reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:")
    {
        return Some(reference.to_string());
    }

    match tokio::fs::read(reference).await {
        Ok(bytes) => {
            let mime = match Path::new(reference)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref()
            {
                Some("png") => "image/png",
                Some("gif") => "image/gif",
                Some("webp") => "image/webp",
                _ => "image/jpeg",
            };
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Some(format!("data:{mime};base64,{encoded}"))
        }
        Err(e) => {
            warn!(path = reference, error = %e, "skipping unreadable image");
            None
        }
    }
}

fn parse_completion(raw: &str, requested_model: &str) -> Result<LlmResponse, LlmError> {
    let completion: ChatCompletion =
        serde_json::from_str(raw).map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?
        .message
        .content
        .unwrap_or_default();
    let usage = completion
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        usage,
        model: completion
            .model
            .unwrap_or_else(|| requested_model.to_string()),
    })
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = self.endpoint(request);
        let body = self.body(request).await;

        let mut http = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "completion endpoint returned an error");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await.map_err(|e| LlmError::RequestFailed {
            reason: e.to_string(),
        })?;
        let parsed = parse_completion(&raw, &request.model)?;
        debug!(
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "completion parsed"
        );
        Ok(parsed)
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibo_ai::{LlmMessage, ModelReference};
    use std::io::Write;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(&LlmConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..LlmConfig::default()
        })
        .expect("backend")
    }

    #[tokio::test]
    async fn body_carries_only_supported_parameters() {
        let model = ModelReference {
            penalty_supported: false,
            ..ModelReference::new("local-model")
        };
        let request = LlmRequest::for_model(&model)
            .with_system("be brief")
            .with_messages(vec![LlmMessage::user("hi"), LlmMessage::assistant("hello")]);

        let body = backend().body(&request).await;

        assert_eq!(body["model"], "local-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["max_tokens"], 500);
        assert!(body.get("frequency_penalty").is_none());
        assert!(body.get("reasoning_effort").is_none());
    }

    #[tokio::test]
    async fn images_attach_to_last_user_message() {
        let mut file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .expect("tempfile");
        file.write_all(b"png").expect("write");
        let path = file.path().to_string_lossy().to_string();

        let request = LlmRequest::new("m")
            .with_messages(vec![LlmMessage::user("first"), LlmMessage::user("look")])
            .with_images(vec![
                "https://example.com/cat.jpg".to_string(),
                path,
                "/no/such/file.jpg".to_string(),
            ]);

        let body = backend().body(&request).await;

        assert_eq!(body["messages"][0]["content"], "first");
        let parts = body["messages"][1]["content"].as_array().expect("parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/cat.jpg");
        assert_eq!(parts[2]["image_url"]["url"], "data:image/png;base64,cG5n");
    }

    #[test]
    fn endpoint_prefers_model_base_url() {
        let backend = backend();
        let mut request = LlmRequest::new("m");
        assert_eq!(
            backend.endpoint(&request),
            "http://localhost:8080/v1/chat/completions"
        );

        request.base_url = Some("http://other:1234/v1/".to_string());
        assert_eq!(
            backend.endpoint(&request),
            "http://other:1234/v1/chat/completions"
        );
    }

    #[test]
    fn completion_parsing() {
        let raw = r#"{
            "model": "gpt-4.1-2025",
            "choices": [{"message": {"role": "assistant", "content": "hey"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }"#;
        let response = parse_completion(raw, "gpt-4.1").expect("parsed");
        assert_eq!(response.content, "hey");
        assert_eq!(response.model, "gpt-4.1-2025");
        assert_eq!(response.usage.total(), 15);

        assert_eq!(
            parse_completion(r#"{"choices": []}"#, "m"),
            Err(LlmError::EmptyResponse)
        );
        assert!(matches!(
            parse_completion("not json", "m"),
            Err(LlmError::ResponseParseFailed { .. })
        ));
    }
}
