//! Pulling JSON objects out of chat model replies.
//!
//! Models asked for "JSON only" still wrap it in Markdown fences or add a
//! sentence before it. Parsing tries, in order: the fence-stripped text, then
//! the span from the first `{` to the last `}`.

use serde::de::DeserializeOwned;

use crate::error::{SynthError, SynthResult};

/// Remove a surrounding Markdown code fence (with or without a language tag).
///
/// Lines after the opening fence are kept up to the next fence line. Text
/// without a leading fence is returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(after_open) = text.strip_prefix("```") else {
        return text;
    };

    match after_open.find('\n') {
        Some(nl) => {
            let body = &after_open[nl + 1..];
            let end = std::iter::once(0)
                .chain(body.match_indices('\n').map(|(i, _)| i + 1))
                .find(|&start| body[start..].trim_start().starts_with("```"))
                .unwrap_or(body.len());
            body[..end].trim()
        }
        // Single line: "```json {...}```"
        None => {
            let inner = after_open.strip_prefix("json").unwrap_or(after_open);
            inner.strip_suffix("```").unwrap_or(inner).trim()
        }
    }
}

/// Outermost `{ ... }` span, first opening brace to last closing brace.
pub fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a JSON object of type `T` from a model reply.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> SynthResult<T> {
    let stripped = strip_code_fence(text);
    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(first) => {
            let span = outermost_object(stripped).ok_or_else(|| SynthError::Extract(first.to_string()))?;
            serde_json::from_str(span).map_err(|e| SynthError::Extract(e.to_string()))
        }
    }
}
