//! Token cost estimation.
//!
//! The window never counts tokens itself. Callers compute a cost with a
//! [`Tokenizer`] and pass it to [`Window::add`](crate::Window::add).

use crate::message::Message;

/// Counts the tokens a piece of text would consume.
pub trait Tokenizer: Send + Sync {
    /// Returns the token count for `text`.
    fn count(&self, text: &str) -> usize;
}

/// Estimates tokens without a vocabulary.
///
/// Uses roughly four characters per token, and never fewer tokens than
/// whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl HeuristicTokenizer {
    const CHARS_PER_TOKEN: usize = 4;
}

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        let words = text.split_whitespace().count();
        chars.div_ceil(Self::CHARS_PER_TOKEN).max(words)
    }
}

/// Cost of a message as it appears in the transcript.
#[must_use]
pub fn message_cost(tokenizer: &dyn Tokenizer, message: &Message) -> usize {
    tokenizer.count(&message.transcript_line())
}

/// Token cost of an image attached to a completion request.
///
/// 85 base tokens plus 170 per 512-pixel tile along each side.
#[must_use]
pub fn image_token_cost(width: u32, height: u32) -> usize {
    let tiles = width.div_ceil(512) + height.div_ceil(512);
    85 + 170 * tiles as usize
}
