//! Token estimation used for prompt planning.
//!
//! Exact counts come from the backend tokenizer after the fact; these
//! estimates only size the preamble and the incoming message.

/// How [`estimate_tokens`] derives its figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimateMethod {
    /// A quarter token per character.
    Chars,
    /// Four tokens per three space-separated words.
    Words,
    /// Weighted blend, 60% characters and 40% words.
    #[default]
    Average,
}

#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn estimate_tokens(text: &str, method: EstimateMethod) -> u32 {
    let word_count = text.split(' ').count() as f64;
    let char_count = text.chars().count() as f64;
    let by_words = word_count / 0.75;
    let by_chars = char_count * 0.25;

    let estimate = match method {
        EstimateMethod::Chars => by_chars,
        EstimateMethod::Words => by_words,
        EstimateMethod::Average => by_chars.mul_add(0.6, by_words * 0.4),
    };
    estimate as u32
}
