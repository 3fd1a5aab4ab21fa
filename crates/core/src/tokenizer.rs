//! Pluggable token counting for chunk sizing and rate-limit estimates.
//!
//! Provides a `Tokenizer` trait with two implementations:
//! `BytesEstimateTokenizer` (fast bytes/4 heuristic, no dependencies) and
//! `TiktokenTokenizer` (exact BPE counting, feature-gated behind `tiktoken`).
//! Whichever is chosen stays fixed for the life of the process, so all
//! chunk-boundary decisions are mutually consistent.

use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
}

/// Default: bytes/4 estimation (fast, no dependencies)
pub struct BytesEstimateTokenizer;

impl Tokenizer for BytesEstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
    fn name(&self) -> &str {
        "bytes-estimate"
    }
}

/// Tiktoken-based tokenizer for exact counts (requires `tiktoken` feature)
#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn new() -> crate::error::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| crate::error::Error::Config(format!("tiktoken init: {e}")))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
    fn name(&self) -> &str {
        "tiktoken"
    }
}

/// Create a tokenizer by name. Falls back to bytes-estimate for unknown names.
pub fn create_tokenizer(name: &str) -> Arc<dyn Tokenizer> {
    match name {
        #[cfg(feature = "tiktoken")]
        "tiktoken" => match TiktokenTokenizer::new() {
            Ok(t) => Arc::new(t),
            Err(_) => Arc::new(BytesEstimateTokenizer),
        },
        _ => Arc::new(BytesEstimateTokenizer),
    }
}
