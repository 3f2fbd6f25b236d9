//! Chunker (C2): token-bounded, overlap-aware splitting with two fixed
//! profiles — a small *text* profile for retrieval and a large *raw-HTML*
//! profile for the sub-document discovery webhook.
//!
//! Tokenization prefers `tiktoken-rs` (`cl100k_base` and friends) and falls
//! back to whitespace counting when the encoding can't be resolved, so
//! chunking never blocks on tokenizer availability.

use std::sync::Arc;

use semchunk_rs::Chunker;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base, p50k_base, p50k_edit, r50k_base};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Errors raised while chunking.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// `chunk_size` must be at least 1.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// The requested tokenizer encoding could not be resolved.
    #[error("tokenizer unavailable for encoding '{encoding}': {source}")]
    Tokenizer {
        encoding: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A fixed chunk-size/overlap profile, in tokens.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProfile {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkProfile {
    /// The *text* profile used for retrieval chunks: 800 tokens, 80 overlap.
    pub const TEXT: ChunkProfile = ChunkProfile {
        chunk_size: 800,
        overlap: 80,
    };

    /// The *raw-HTML* profile used for sub-document discovery payloads:
    /// 4000 tokens, 200 overlap.
    pub const RAW_HTML: ChunkProfile = ChunkProfile {
        chunk_size: 4000,
        overlap: 200,
    };
}

/// Chunk `text` using `profile`'s token budget and overlap, with the
/// `cl100k_base` encoding (or the named `encoding` override). Deterministic
/// given the same input and profile. Returns an empty vector for
/// whitespace-only input.
pub fn chunk_text(
    text: &str,
    profile: ChunkProfile,
    encoding: &str,
) -> Result<Vec<String>, ChunkingError> {
    if profile.chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let token_counter = build_token_counter(encoding)?;
    Ok(chunk_text_with_counter(
        text,
        profile.chunk_size,
        profile.overlap,
        token_counter,
    ))
}

/// Build a token counter for the named encoding, falling back to a
/// whitespace counter (logged at `warn`) when the encoding can't be resolved.
pub fn build_token_counter(encoding: &str) -> Result<TokenCounter, ChunkingError> {
    match build_tiktoken_counter(encoding) {
        Ok(counter) => Ok(counter),
        Err(error) => {
            tracing::warn!(
                encoding,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            Ok(default_token_counter())
        }
    }
}

fn build_tiktoken_counter(encoding: &str) -> Result<TokenCounter, ChunkingError> {
    let target = if encoding.trim().is_empty() {
        "cl100k_base"
    } else {
        encoding.trim()
    };
    let bpe = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        encoding: target.to_string(),
        source,
    })?;
    let bpe = Arc::new(bpe);
    Ok(Arc::new(move |segment: &str| bpe.encode_ordinary(segment).len()))
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, anyhow::Error> {
    match name {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        other => {
            tracing::debug!(encoding = other, "Unknown encoding name; defaulting to cl100k_base");
            cl100k_base()
        }
    }
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() { 1 } else { tokens }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    if chunks.is_empty() {
        return chunks;
    }

    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let mut previous = iter.next().expect("non-empty chunks guard above");
    overlapped.push(previous.clone());

    for current in iter {
        let overlapped_chunk =
            build_overlapped_chunk(&previous, &current, effective_overlap, chunk_size, token_counter);
        overlapped.push(overlapped_chunk);
        previous = current;
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    if overlap == 0 {
        return current.to_string();
    }

    let tail = tail_with_token_limit(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_token_budget(&combined, chunk_size, token_counter)
}

fn tail_with_token_limit<'a>(text: &'a str, token_limit: usize, token_counter: &TokenCounter) -> &'a str {
    if token_limit == 0 {
        return "";
    }

    let trimmed_text = text.trim_start();
    if token_counter.as_ref()(trimmed_text) <= token_limit {
        return trimmed_text;
    }

    let len = text.len();
    let mut start = 0;
    while start < len {
        let next_start = text[start..]
            .char_indices()
            .nth(1)
            .map(|(offset, _)| start + offset)
            .unwrap_or(len);
        start = next_start;
        let candidate = text[start..].trim_start();
        if token_counter.as_ref()(candidate) <= token_limit {
            return candidate;
        }
    }
    ""
}

fn trim_to_token_budget(text: &str, token_budget: usize, token_counter: &TokenCounter) -> String {
    if token_budget == 0 {
        return String::new();
    }
    if token_counter.as_ref()(text) <= token_budget {
        return text.to_string();
    }

    let len = text.len();
    let mut start = 0;
    while start < len {
        let next_start = text[start..]
            .char_indices()
            .nth(1)
            .map(|(offset, _)| start + offset)
            .unwrap_or(len);
        start = next_start;
        let candidate = text[start..].trim_start();
        if token_counter.as_ref()(candidate) <= token_budget {
            return candidate.to_string();
        }
    }
    String::new()
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars().next().map(|c| c.is_whitespace()).unwrap_or(false)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().map(|c| c.is_whitespace()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_rejects_zero_chunk_size() {
        let profile = ChunkProfile { chunk_size: 0, overlap: 0 };
        let error = chunk_text("hello", profile, "cl100k_base").unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn chunk_text_handles_whitespace_only_input() {
        let chunks = chunk_text("   \n\t ", ChunkProfile::TEXT, "cl100k_base").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_text_with_counter_applies_overlap() {
        let text = "one two three four five";
        let counter = default_token_counter();
        let chunks = chunk_text_with_counter(text, 3, 1, counter.clone());
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn chunk_text_is_deterministic_given_same_input_and_profile() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(50);
        let first = chunk_text(&text, ChunkProfile::TEXT, "cl100k_base").unwrap();
        let second = chunk_text(&text, ChunkProfile::TEXT, "cl100k_base").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn raw_html_profile_produces_larger_chunks_than_text_profile() {
        let text = "word ".repeat(6000);
        let text_chunks = chunk_text(&text, ChunkProfile::TEXT, "cl100k_base").unwrap();
        let html_chunks = chunk_text(&text, ChunkProfile::RAW_HTML, "cl100k_base").unwrap();
        assert!(html_chunks.len() < text_chunks.len());
    }

    #[test]
    fn chunks_respect_token_budget_under_tiktoken_counter() {
        let text = "The quick brown fox jumps over the lazy dog.".repeat(20);
        let profile = ChunkProfile { chunk_size: 20, overlap: 4 };
        let chunks = chunk_text(&text, profile, "cl100k_base").unwrap();
        let counter = build_tiktoken_counter("cl100k_base").unwrap();
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 20);
        }
    }

    #[test]
    fn unknown_encoding_name_falls_back_without_erroring() {
        let chunks = chunk_text("hello world", ChunkProfile::TEXT, "not-a-real-encoding").unwrap();
        assert!(!chunks.is_empty());
    }
}
