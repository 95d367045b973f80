//! Token-budgeted conversation window.
//!
//! A [`Window`] keeps the most recent messages of one chat, oldest first,
//! and evicts from the head whenever the running token total exceeds its
//! ceiling. It also remembers the last few image references, which do not
//! count against the token budget.
//!
//! Window operations are synchronous and never perform I/O. Concurrent
//! access is the owner's concern; the relay keeps one mutex per window.

use crate::message::{Message, MessageRole};
use mibo_core::{ChatId, MessageId};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Limits applied to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Token ceiling for the message sequence.
    pub max_tokens: usize,
    /// Capacity of the image-reference cache.
    pub max_images: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            max_images: 3,
        }
    }
}

impl WindowConfig {
    /// Sets the token ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the image cache capacity.
    #[must_use]
    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }
}

/// A message projected for a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Role label.
    pub role: MessageRole,
    /// Flattened text content; empty when the message has none.
    pub text: String,
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    cost: usize,
}

/// Ordered, token-budgeted message buffer for one chat.
#[derive(Debug, Clone)]
pub struct Window {
    chat_id: ChatId,
    config: WindowConfig,
    entries: VecDeque<Entry>,
    images: VecDeque<String>,
    tokens: usize,
    ready: bool,
}

impl Window {
    /// Creates an empty window.
    #[must_use]
    pub fn new(chat_id: ChatId, config: WindowConfig) -> Self {
        Self {
            chat_id,
            config,
            entries: VecDeque::new(),
            images: VecDeque::with_capacity(config.max_images),
            tokens: 0,
            ready: false,
        }
    }

    /// The chat this window belongs to.
    #[must_use]
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Running token total of the messages held.
    #[must_use]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Current token ceiling.
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the window holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the window has been hydrated or has received a message.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Messages held, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Appends `message` and evicts from the head until the total fits.
    ///
    /// A message whose cost alone exceeds the ceiling is still admitted; it
    /// evicts everything, itself included, and leaves the window empty.
    /// Returns the evicted messages, oldest first.
    pub fn add(&mut self, message: Message, token_cost: usize) -> Vec<Message> {
        self.entries.push_back(Entry {
            message,
            cost: token_cost,
        });
        self.tokens += token_cost;
        self.ready = true;

        let mut evicted = Vec::new();
        while self.tokens > self.config.max_tokens {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            self.tokens -= oldest.cost;
            evicted.push(oldest.message);
        }

        if !evicted.is_empty() {
            trace!(
                chat_id = %self.chat_id,
                evicted = evicted.len(),
                tokens = self.tokens,
                "window trimmed"
            );
        }
        evicted
    }

    /// Loads persisted history into the window and marks it ready.
    ///
    /// Messages are added in order, so the budget keeps the newest ones.
    pub fn hydrate<I>(&mut self, history: I)
    where
        I: IntoIterator<Item = (Message, usize)>,
    {
        for (message, cost) in history {
            self.add(message, cost);
        }
        self.ready = true;
    }

    /// Removes messages by identifier, wherever they sit.
    ///
    /// Unknown identifiers are ignored. Returns how many messages were
    /// removed.
    pub fn remove(&mut self, ids: &[MessageId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let ids: HashSet<&MessageId> = ids.iter().collect();
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|e| {
            let keep = !ids.contains(&e.message.id);
            if !keep {
                freed += e.cost;
            }
            keep
        });
        self.tokens -= freed;
        before - self.entries.len()
    }

    /// Empties the messages and image references.
    ///
    /// Persisted history is untouched.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.images.clear();
        self.tokens = 0;
    }

    /// Updates the ceiling. The next [`add`](Window::add) enforces it.
    pub fn set_max_tokens(&mut self, max_tokens: usize) {
        self.config.max_tokens = max_tokens;
    }

    /// Projects the messages into role and text pairs, oldest first.
    ///
    /// Every message yields exactly one entry.
    #[must_use]
    pub fn process_context(&self) -> Vec<ContextEntry> {
        self.messages()
            .map(|m| ContextEntry {
                role: m.role,
                text: m.text().to_string(),
            })
            .collect()
    }

    /// Records an image reference, dropping the oldest beyond capacity.
    pub fn add_image_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if url.is_empty() || self.config.max_images == 0 {
            return;
        }
        if self.images.len() == self.config.max_images {
            self.images.pop_front();
        }
        self.images.push_back(url);
    }

    /// Image references held, oldest first.
    #[must_use]
    pub fn image_urls(&self) -> Vec<String> {
        self.images.iter().cloned().collect()
    }
}
