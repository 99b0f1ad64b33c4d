//! Token counting.
//!
//! The assembler only needs `text -> count`. The default is a character
//! estimate; callers with a real tokenizer plug it in and usually wrap it in
//! [`sampled`] so large excerpts don't get tokenized in full.

use std::sync::Arc;

/// Shared token counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Texts shorter than this (in bytes) are always counted in full.
pub const SAMPLE_THRESHOLD: usize = 200;

/// Target number of sampled lines for a long text.
const SAMPLE_LINES: usize = 100;

/// Roughly four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// The default counter.
pub fn char_estimator() -> TokenCounter {
    Arc::new(estimate_tokens)
}

/// Wrap `counter` so long texts are estimated from an evenly strided subset
/// of their lines, scaled up by byte ratio.
pub fn sampled(counter: TokenCounter) -> TokenCounter {
    Arc::new(move |text: &str| {
        if text.len() < SAMPLE_THRESHOLD {
            return counter(text);
        }

        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let step = (lines.len() / SAMPLE_LINES).max(1);
        if step == 1 {
            return counter(text);
        }

        let sample: String = lines.iter().step_by(step).copied().collect();
        if sample.is_empty() {
            return counter(text);
        }

        let sample_tokens = counter(&sample);
        // ceil(sample_tokens * total_bytes / sample_bytes)
        (sample_tokens * text.len()).div_ceil(sample.len())
    })
}
