//! Character-based token estimation.
//!
//! Used by clients that have no tokenizer of their own. Counts are only
//! approximate, but the same estimator is applied to the outgoing messages
//! and to the answer, so the two numbers stay comparable.

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Approximate token counter with a fixed chars-per-token ratio.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl TokenEstimator {
    /// Create an estimator with a calibrated ratio. Non-positive ratios fall
    /// back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn with_chars_per_token(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimate tokens in `text`. Non-empty text is always at least one token.
    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::with_chars_per_token(DEFAULT_CHARS_PER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(TokenEstimator::default().estimate(""), 0);
    }

    #[test]
    fn short_text_rounds_up() {
        let est = TokenEstimator::default();
        assert_eq!(est.estimate("a"), 1);
        assert_eq!(est.estimate("abcdefg"), 2);
        assert_eq!(est.estimate("abcdefgh"), 3);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let est = TokenEstimator::with_chars_per_token(1.0);
        assert_eq!(est.estimate("héllo"), 5);
    }

    #[test]
    fn invalid_ratio_falls_back_to_default() {
        let est = TokenEstimator::with_chars_per_token(0.0);
        assert_eq!(est.chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
    }
}
