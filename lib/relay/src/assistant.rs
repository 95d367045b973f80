//! Completion handling.
//!
//! The assistant service answers [`CompletionRequested`] events: it calls
//! the LLM backend with the parameters of the requested model, cleans up the
//! reply, records it in the chat's window and emits an
//! [`AssistantResponse`].

use crate::error::RelayError;
use crate::events::{
    AssistantResponse, CompletionRequested, ErrorEvent, MessagesStored, StoredMessage,
};
use crate::refs::{RefStore, lock_window};
use mibo_ai::{LlmBackend, LlmMessage, LlmRequest};
use mibo_bus::{EventBus, HandlerError, HandlerId};
use mibo_conversation::{Message, Tokenizer, message_cost};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Separator the model uses between outgoing messages.
pub const MESSAGE_SEPARATOR: &str = "|n|";

const DEFAULT_FALLBACK: &str = "Sorry, I can't answer right now. Please try again later.";

/// Cleans a raw model reply into the messages to send.
///
/// Drops everything up to the last `think_token`, turns em-dashes into
/// hyphens, splits on [`MESSAGE_SEPARATOR`], strips `"<name>:"` prefixes
/// the model sometimes adds, and drops empty parts.
#[must_use]
pub fn split_reply(raw: &str, think_token: &str, names: &[String]) -> Vec<String> {
    let visible = if think_token.is_empty() {
        raw
    } else {
        raw.rsplit_once(think_token).map_or(raw, |(_, after)| after)
    };

    visible
        .replace(" \u{2014} ", " - ")
        .replace('\u{2014}', " - ")
        .split(MESSAGE_SEPARATOR)
        .map(|part| strip_name_prefix(part.trim(), names).to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn strip_name_prefix<'a>(mut text: &'a str, names: &[String]) -> &'a str {
    loop {
        let rest = names
            .iter()
            .filter(|name| !name.is_empty())
            .find_map(|name| {
                let head = text.get(..name.len())?;
                if !head.eq_ignore_ascii_case(name) {
                    return None;
                }
                text[name.len()..].trim_start().strip_prefix(':')
            });
        match rest {
            Some(rest) => text = rest.trim_start(),
            None => return text,
        }
    }
}

/// Answers completion requests through an [`LlmBackend`].
pub struct AssistantService {
    bus: EventBus,
    refs: Arc<RefStore>,
    backend: Arc<dyn LlmBackend>,
    tokenizer: Arc<dyn Tokenizer>,
    fallback: String,
}

impl AssistantService {
    #[must_use]
    pub fn new(
        bus: EventBus,
        refs: Arc<RefStore>,
        backend: Arc<dyn LlmBackend>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            bus,
            refs,
            backend,
            tokenizer,
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }

    /// Sets the text sent when the backend fails.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn register(self: &Arc<Self>) -> Vec<HandlerId> {
        let service = Arc::clone(self);
        vec![self.bus.register(move |event: Arc<CompletionRequested>| {
            let service = Arc::clone(&service);
            async move {
                service
                    .on_completion(&event)
                    .await
                    .map_err(HandlerError::from_display)
            }
        })]
    }

    /// Builds the backend request for a completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested model is not in the catalog.
    pub fn build_request(&self, request: &CompletionRequested) -> Result<LlmRequest, RelayError> {
        let model = self
            .refs
            .catalog()
            .model(&request.model)
            .ok_or_else(|| RelayError::UnknownModel {
                id: request.model.clone(),
            })?;

        let mut llm = LlmRequest::for_model(model)
            .with_messages(request.context.iter().cloned().map(LlmMessage::from).collect())
            .with_images(request.images.clone());
        let system = model.system_prompt(&request.system_prompt);
        if !system.is_empty() {
            llm = llm.with_system(system);
        }
        Ok(llm)
    }

    /// Generates and publishes the reply to one completion request.
    ///
    /// A backend failure is not an error here: it is reported with an
    /// [`ErrorEvent`] and answered with the fallback text.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unknown or the chat's window cannot
    /// be loaded.
    #[instrument(skip(self, request), fields(chat_id = %request.chat_id, model = %request.model))]
    pub async fn on_completion(
        &self,
        request: &CompletionRequested,
    ) -> Result<(), Report<RelayError>> {
        let llm = self.build_request(request)?;
        let think_token = self
            .refs
            .catalog()
            .model(&request.model)
            .map(|m| m.think_token.clone())
            .unwrap_or_default();
        let (display_name, names) = match self.refs.catalog().assistant(&request.assistant) {
            Some(assistant) => (assistant.display_name().to_string(), assistant.names.clone()),
            None => (request.assistant.clone(), Vec::new()),
        };

        let response = match self.backend.generate(&llm).await {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = self.backend.provider(), error = %e, "completion failed");
                self.bus
                    .emit(ErrorEvent::new(
                        Some(request.chat_id.clone()),
                        format!("completion failed: {e}"),
                    ))
                    .await;
                let mut fallback = AssistantResponse::reply_to(request, vec![self.fallback.clone()]);
                fallback.fallback = true;
                self.bus.emit(fallback).await;
                return Ok(());
            }
        };

        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "completion received"
        );

        let parts = split_reply(&response.content, &think_token, &names);
        if parts.is_empty() {
            info!("model reply was empty after cleanup");
            return Ok(());
        }

        let stored: Vec<StoredMessage> = parts
            .iter()
            .map(|part| {
                let message = Message::assistant(display_name.clone(), part.clone());
                let cost = message_cost(self.tokenizer.as_ref(), &message);
                StoredMessage::new(message, cost)
            })
            .collect();

        let window = self.refs.window(&request.chat_id).await?;
        {
            let mut window = lock_window(&window);
            for entry in &stored {
                window.add(entry.message.clone(), entry.tokens);
            }
        }

        self.bus
            .emit(MessagesStored::new(request.chat_id.clone(), stored))
            .await;
        self.bus
            .emit(AssistantResponse::reply_to(request, parts))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatKind;
    use crate::refs::RefSettings;
    use async_trait::async_trait;
    use mibo_ai::{
        AssistantReference, LlmError, LlmResponse, ModelReference, ReferenceCatalog, TokenUsage,
    };
    use mibo_bus::Event;
    use mibo_conversation::{ContextEntry, HeuristicTokenizer, MessageRole};
    use mibo_core::{ChatId, MessageId};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned results and records every request.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedBackend {
        fn replying(replies: impl IntoIterator<Item = Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.requests.lock().expect("lock").push(request.clone());
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))?;
            Ok(LlmResponse {
                content: reply,
                usage: TokenUsage::default(),
                model: request.model.clone(),
            })
        }

        fn provider(&self) -> &str {
            "scripted"
        }
    }

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::new()
            .with_model(ModelReference::new("gpt-4.1"))
            .with_model(ModelReference {
                penalty_supported: false,
                reasoning: true,
                disable_thinking: true,
                ..ModelReference::new("qwen")
            })
            .with_assistant(AssistantReference {
                names: vec!["Mibo".to_string(), "Mibster".to_string()],
                ..AssistantReference::new("default")
            })
    }

    fn record<E: Event + Clone>(bus: &EventBus) -> Arc<Mutex<Vec<E>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.register(move |event: Arc<E>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().expect("lock").push((*event).clone());
                Ok(())
            }
        });
        seen
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn completion(model: &str) -> CompletionRequested {
        CompletionRequested::new(
            ChatId::from("c"),
            model,
            "default",
            "You are Mibo.",
            vec![ContextEntry {
                role: MessageRole::User,
                text: "hi".to_string(),
            }],
        )
        .with_images(vec!["img/a.png".to_string()])
        .with_reply_to(Some(MessageId::from("9")))
    }

    async fn service(backend: Arc<ScriptedBackend>) -> (EventBus, Arc<RefStore>, AssistantService) {
        let bus = EventBus::new();
        let refs = Arc::new(RefStore::new(
            bus.clone(),
            Arc::new(catalog()),
            RefSettings {
                memory_timeout: Duration::from_millis(10),
                ..RefSettings::default()
            },
        ));
        refs.chat(&ChatId::from("c"), "Cats", ChatKind::Group).await;
        let service = AssistantService::new(
            bus.clone(),
            Arc::clone(&refs),
            backend,
            Arc::new(HeuristicTokenizer),
        );
        (bus, refs, service)
    }

    fn names() -> Vec<String> {
        vec!["Mibo".to_string()]
    }

    #[test]
    fn reply_drops_reasoning() {
        let parts = split_reply("<think>hmm, a greeting</think>Hello!", "</think>", &names());
        assert_eq!(parts, ["Hello!"]);

        let parts = split_reply("no reasoning here", "</think>", &names());
        assert_eq!(parts, ["no reasoning here"]);
    }

    #[test]
    fn reply_splits_and_cleans_parts() {
        let parts = split_reply(
            "mibo: MIBO: First \u{2014} really|n| |n|Second\u{2014}part|n|Mibo:",
            "</think>",
            &names(),
        );
        assert_eq!(parts, ["First - really", "Second - part"]);
    }

    #[test]
    fn reply_keeps_names_that_are_not_prefixes() {
        let parts = split_reply("Mibo says hi: hello", "", &names());
        assert_eq!(parts, ["Mibo says hi: hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn request_follows_model_parameters() {
        let backend = Arc::new(ScriptedBackend::default());
        let (_bus, _refs, service) = service(backend).await;

        let plain = service.build_request(&completion("gpt-4.1")).expect("request");
        assert_eq!(plain.system.as_deref(), Some("You are Mibo."));
        assert_eq!(plain.frequency_penalty, Some(0.1));
        assert_eq!(plain.reasoning_effort, None);
        assert_eq!(plain.max_tokens, Some(500));
        assert_eq!(plain.images, ["img/a.png"]);
        assert_eq!(plain.messages, [LlmMessage::user("hi")]);

        let qwen = service.build_request(&completion("qwen")).expect("request");
        assert_eq!(qwen.system.as_deref(), Some("You are Mibo.\n/no_think"));
        assert_eq!(qwen.frequency_penalty, None);
        assert_eq!(qwen.presence_penalty, None);
        assert_eq!(qwen.reasoning_effort.as_deref(), Some("medium"));

        assert!(matches!(
            service.build_request(&completion("missing")),
            Err(RelayError::UnknownModel { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_is_recorded_and_published() {
        let backend = ScriptedBackend::replying([Ok("Mibo: Hi there!|n|How are you?".to_string())]);
        let (bus, refs, service) = service(Arc::clone(&backend)).await;
        let responses = record::<AssistantResponse>(&bus);
        let stored = record::<MessagesStored>(&bus);
        let request = completion("gpt-4.1");

        service.on_completion(&request).await.expect("handled");
        settle().await;

        let responses = responses.lock().expect("lock").clone();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].correlation_id(), request.correlation_id());
        assert_eq!(responses[0].messages, ["Hi there!", "How are you?"]);
        assert_eq!(responses[0].reply_to, Some(MessageId::from("9")));
        assert!(!responses[0].fallback);

        let stored = stored.lock().expect("lock").clone();
        assert_eq!(stored[0].messages.len(), 2);
        assert_eq!(stored[0].messages[0].message.role, MessageRole::Assistant);
        assert_eq!(stored[0].messages[0].message.user, "Mibo");

        let window = refs.window(&ChatId::from("c")).await.expect("window");
        let texts: Vec<String> = lock_window(&window)
            .messages()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(texts, ["Hi there!", "How are you?"]);
        assert_eq!(backend.requests.lock().expect("lock").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_sends_fallback_and_reports() {
        let backend = ScriptedBackend::replying([Err(LlmError::Timeout)]);
        let (bus, refs, service) = service(backend).await;
        let service = service.with_fallback("brb");
        let responses = record::<AssistantResponse>(&bus);
        let errors = record::<ErrorEvent>(&bus);

        service
            .on_completion(&completion("gpt-4.1"))
            .await
            .expect("handled");
        settle().await;

        let responses = responses.lock().expect("lock").clone();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].fallback);
        assert_eq!(responses[0].messages, ["brb"]);

        let errors = errors.lock().expect("lock").clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.contains("timed out"));

        let window = refs.window(&ChatId::from("c")).await.expect("window");
        assert!(lock_window(&window).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn thinking_only_reply_sends_nothing() {
        let backend = ScriptedBackend::replying([Ok("<think>...</think>  ".to_string())]);
        let (bus, _refs, service) = service(backend).await;
        let responses = record::<AssistantResponse>(&bus);

        service
            .on_completion(&completion("gpt-4.1"))
            .await
            .expect("handled");
        settle().await;

        assert!(responses.lock().expect("lock").is_empty());
    }
}
