//! Token Estimation
//!
//! Pessimistic token estimates for budget reservations and tier routing.
//! Estimates only need to be stable and on the high side: a reservation is
//! reconciled to the backend's reported usage after the call.

/// Token estimation method
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TokenEstimator {
    /// Simple character-based estimation (4 chars = 1 token)
    CharBased,
    /// Word-based estimation (0.75 tokens per word on average)
    WordBased,
    /// Punctuation-aware estimation, suited to JSON and code
    #[default]
    StructureAware,
}

/// Token counter for prompt sizing
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter {
    estimator: TokenEstimator,
}

impl TokenCounter {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Estimate token count for a string
    pub fn count(&self, text: &str) -> u64 {
        let tokens = match self.estimator {
            TokenEstimator::CharBased => text.chars().count().div_ceil(4),
            TokenEstimator::WordBased => {
                let words = text.split_whitespace().count();
                (words as f32 * 0.75).ceil() as usize + 1
            }
            TokenEstimator::StructureAware => Self::count_structure_aware(text),
        };
        tokens as u64
    }

    /// Punctuation and operators count as individual tokens; words are
    /// charged by length.
    fn count_structure_aware(text: &str) -> usize {
        let mut tokens = 0;
        let mut word_len = 0;

        for ch in text.chars() {
            match ch {
                '(' | ')' | '{' | '}' | '[' | ']' | ';' | ':' | ',' | '.' | '+' | '-' | '*'
                | '/' | '=' | '<' | '>' | '!' | '&' | '|' | '"' | '\'' | '?' | '\\' => {
                    tokens += Self::word_tokens(word_len);
                    word_len = 0;
                    tokens += 1;
                }
                c if c.is_whitespace() => {
                    tokens += Self::word_tokens(word_len);
                    word_len = 0;
                }
                c => word_len += c.len_utf8(),
            }
        }
        tokens += Self::word_tokens(word_len);

        tokens.max(1)
    }

    fn word_tokens(len: usize) -> usize {
        match len {
            0 => 0,
            1..=4 => 1,
            5..=8 => 2,
            _ => len.div_ceil(4),
        }
    }

    /// Check if content fits within a token ceiling
    pub fn fits(&self, text: &str, ceiling: u64) -> bool {
        self.count(text) <= ceiling
    }
}

/// Cut `text` to roughly `max_chars`, preferring a whitespace boundary
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    if text.chars().count() <= max_chars {
        return text;
    }
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let cut = &text[..end];
    match cut.rfind(char::is_whitespace) {
        Some(ws) if ws > end / 2 => &cut[..ws],
        _ => cut,
    }
}
