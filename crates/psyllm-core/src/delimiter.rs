//! Think-delimiter configuration.
//!
//! The id that closes a reasoning trace is specific to a model's vocabulary
//! (151668 is `</think>` in the Qwen3 vocabulary PsyLLM is built on), so it
//! is never hard-coded here. It must be configured, either as a raw id or as
//! the token text to look up, and is checked against the loaded tokenizer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Vocabulary lookups needed to resolve and validate a delimiter.
pub trait Vocabulary {
    fn token_id(&self, text: &str) -> Option<u32>;
    fn vocab_size(&self) -> usize;
}

/// A delimiter id that has been resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThinkDelimiter(u32);

impl ThinkDelimiter {
    /// Wrap a raw id without validation.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    /// Check that the id exists in `vocab`.
    pub fn validate<V: Vocabulary + ?Sized>(self, vocab: &V) -> CoreResult<Self> {
        let size = vocab.vocab_size();
        if (self.0 as usize) < size {
            Ok(self)
        } else {
            Err(config_error(format!(
                "delimiter id {} is outside the tokenizer vocabulary (size {size})",
                self.0
            )))
        }
    }
}

/// Delimiter as written in configuration. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimiterSpec {
    /// Raw token id, e.g. `151668`.
    #[serde(default)]
    pub delimiter_id: Option<u32>,
    /// Token text looked up in the vocabulary, e.g. `"</think>"`.
    #[serde(default)]
    pub delimiter_token: Option<String>,
}

impl DelimiterSpec {
    pub fn from_id(id: u32) -> Self {
        Self { delimiter_id: Some(id), delimiter_token: None }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self { delimiter_id: None, delimiter_token: Some(token.into()) }
    }

    pub fn is_empty(&self) -> bool {
        self.delimiter_id.is_none() && self.delimiter_token.is_none()
    }

    /// Resolve against a vocabulary.
    ///
    /// When both an id and a token are configured they must name the same
    /// vocabulary entry.
    pub fn resolve<V: Vocabulary + ?Sized>(&self, vocab: &V) -> CoreResult<ThinkDelimiter> {
        let from_token = match &self.delimiter_token {
            Some(text) => Some(vocab.token_id(text).ok_or_else(|| {
                config_error(format!("delimiter token {text:?} is not in the tokenizer vocabulary"))
            })?),
            None => None,
        };

        let id = match (self.delimiter_id, from_token) {
            (None, None) => {
                return Err(config_error(
                    "no delimiter configured: set split.delimiter_id or split.delimiter_token".to_string(),
                ))
            }
            (Some(id), None) | (None, Some(id)) => id,
            (Some(id), Some(looked_up)) if id == looked_up => id,
            (Some(id), Some(looked_up)) => {
                return Err(config_error(format!(
                    "delimiter id {id} does not match token {:?} (id {looked_up})",
                    self.delimiter_token.as_deref().unwrap_or_default()
                )))
            }
        };

        let delimiter = ThinkDelimiter::new(id).validate(vocab)?;
        debug!(delimiter_id = id, "Resolved think delimiter");
        Ok(delimiter)
    }
}

fn config_error(reason: String) -> CoreError {
    CoreError::Config { field: "split.delimiter".to_string(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct QwenLike;

    impl Vocabulary for QwenLike {
        fn token_id(&self, text: &str) -> Option<u32> {
            match text {
                "<think>" => Some(151667),
                "</think>" => Some(151668),
                _ => None,
            }
        }

        fn vocab_size(&self) -> usize {
            151669
        }
    }

    #[test]
    fn unconfigured_is_an_error() {
        let err = DelimiterSpec::default().resolve(&QwenLike).unwrap_err();
        assert!(matches!(err, CoreError::Config { ref field, .. } if field == "split.delimiter"));
    }

    #[test]
    fn resolves_from_id() {
        let d = DelimiterSpec::from_id(151668).resolve(&QwenLike).unwrap();
        assert_eq!(d.id(), 151668);
    }

    #[test]
    fn resolves_from_token_text() {
        let d = DelimiterSpec::from_token("</think>").resolve(&QwenLike).unwrap();
        assert_eq!(d, ThinkDelimiter::new(151668));
    }

    #[test]
    fn unknown_token_text_errors() {
        assert!(DelimiterSpec::from_token("</reasoning>").resolve(&QwenLike).is_err());
    }

    #[test]
    fn id_outside_vocab_errors() {
        assert!(DelimiterSpec::from_id(200_000).resolve(&QwenLike).is_err());
        assert!(ThinkDelimiter::new(151669).validate(&QwenLike).is_err());
    }

    #[test]
    fn id_and_token_must_agree() {
        let agree = DelimiterSpec {
            delimiter_id: Some(151668),
            delimiter_token: Some("</think>".into()),
        };
        assert_eq!(agree.resolve(&QwenLike).unwrap().id(), 151668);

        let disagree = DelimiterSpec {
            delimiter_id: Some(151667),
            delimiter_token: Some("</think>".into()),
        };
        assert!(disagree.resolve(&QwenLike).is_err());
    }

    #[test]
    fn spec_deserializes_from_partial_table() {
        let spec: DelimiterSpec = serde_json::from_str(r#"{"delimiter_token":"</think>"}"#).unwrap();
        assert_eq!(spec, DelimiterSpec::from_token("</think>"));
        assert!(!spec.is_empty());
    }
}
