//! Post-generation response splitting.
//!
//! Reasoning models emit their chain of thought first and close it with a
//! reserved delimiter token (`</think>` for the Qwen3 vocabulary). Once
//! generation is finished the output ids are cut immediately after the
//! *last* delimiter: everything up to and including it is the thinking
//! trace, everything after is the answer shown to the user.
//!
//! Cutting at the last occurrence keeps stray delimiters that the model
//! emitted mid-trace inside the thinking segment. When no delimiter is
//! present the whole output is treated as content, which is the normal case
//! when thinking mode is switched off.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delimiter::ThinkDelimiter;
use crate::error::CoreResult;
use crate::model::Decoder;

/// Borrowed views over the two halves of an output sequence.
///
/// `thinking` followed by `content` is always exactly the input slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments<'a> {
    pub thinking: &'a [u32],
    pub content: &'a [u32],
}

impl<'a> Segments<'a> {
    /// Index in the original sequence where the content segment starts.
    pub fn boundary(&self) -> usize {
        self.thinking.len()
    }

    /// `true` when a delimiter was found (the thinking segment is non-empty).
    pub fn has_thinking(&self) -> bool {
        !self.thinking.is_empty()
    }
}

/// Partition `tokens` after the last occurrence of `delimiter`.
///
/// Total over every input: an empty slice yields two empty segments and a
/// slice without the delimiter yields an empty thinking segment.
pub fn split(tokens: &[u32], delimiter: u32) -> Segments<'_> {
    let boundary = match tokens.iter().rposition(|&id| id == delimiter) {
        Some(pos) => pos + 1,
        None => 0,
    };
    let (thinking, content) = tokens.split_at(boundary);
    Segments { thinking, content }
}

/// Decoded thinking trace and answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResponse {
    pub thinking: String,
    pub content: String,
}

/// Splits output ids at a configured delimiter and decodes both halves.
#[derive(Debug, Clone)]
pub struct ResponseSplitter<D> {
    delimiter: ThinkDelimiter,
    decoder: D,
}

impl<D: Decoder> ResponseSplitter<D> {
    pub fn new(delimiter: ThinkDelimiter, decoder: D) -> Self {
        Self { delimiter, decoder }
    }

    pub fn delimiter(&self) -> ThinkDelimiter {
        self.delimiter
    }

    /// Token-level split without decoding.
    pub fn segments<'a>(&self, tokens: &'a [u32]) -> Segments<'a> {
        split(tokens, self.delimiter.id())
    }

    /// Split `tokens` and decode each span once, skipping special tokens and
    /// trimming leading/trailing newlines from each decoded string.
    ///
    /// A decoder error on either span is returned as-is.
    pub fn split_decode(&self, tokens: &[u32]) -> CoreResult<SplitResponse> {
        let segments = self.segments(tokens);
        debug!(
            total = tokens.len(),
            thinking_tokens = segments.thinking.len(),
            content_tokens = segments.content.len(),
            "Split model output"
        );

        let thinking = self.decoder.decode(segments.thinking, true)?;
        let content = self.decoder.decode(segments.content, true)?;

        Ok(SplitResponse {
            thinking: trim_newlines(&thinking).to_string(),
            content: trim_newlines(&content).to_string(),
        })
    }
}

fn trim_newlines(s: &str) -> &str {
    s.trim_matches('\n')
}
