//! Tokenizer seam used by the segmenter

use crate::error::Result;
use std::ops::Range;

/// Splits text into model tokens, reporting each token's byte span.
///
/// Implementations must be pure: identical input yields identical spans.
/// Spans are byte offsets into `text`, sorted by start. Spans may repeat
/// when one character is split into several byte-level tokens. Special
/// tokens (CLS/SEP) are not included.
pub trait Tokenize: Send + Sync {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>>;

    /// Number of tokens in `text`
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.token_spans(text)?.len())
    }
}
