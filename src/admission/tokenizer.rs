//! Token counting seam — the admission layer's only tokenizer dependency

/// Counts prompt tokens for budget computation.
///
/// Admission only ever needs a count, never the token ids, so the seam is a
/// single method. A model-accurate tokenizer plugs in here; the default is a
/// character heuristic good enough for budget arithmetic.
pub trait TokenCounter: Send + Sync {
    /// Estimated token count for `text`
    fn count(&self, text: &str) -> usize;

    /// Counter name (for logging)
    fn name(&self) -> &str;
}

/// Heuristic counter: roughly four characters per token, the long-run
/// average for BPE vocabularies on English text.
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(4)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Counter that returns a fixed count regardless of input (test-only)
#[cfg(test)]
pub(crate) struct FixedTokenCounter(pub usize);

#[cfg(test)]
impl TokenCounter for FixedTokenCounter {
    fn count(&self, _text: &str) -> usize {
        self.0
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
