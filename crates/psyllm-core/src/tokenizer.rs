use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;
use tracing::debug;

use crate::delimiter::Vocabulary;
use crate::error::{CoreError, CoreResult};
use crate::model::Decoder;

/// End-of-turn markers used by Qwen3-family vocabularies, most specific first.
const EOS_CANDIDATES: &[&str] = &["<|im_end|>", "<|endoftext|>"];

/// Thin wrapper around the Hugging Face `tokenizers` crate.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    inner: HfTokenizer,
    eos_token_id: Option<u32>,
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let inner = HfTokenizer::from_file(path).map_err(|e| {
            CoreError::Tokenizer(format!("cannot load {}: {e}", path.display()))
        })?;
        let tokenizer = Self::from_hf(inner);

        debug!(
            path = %path.display(),
            eos_token_id = tokenizer.eos_token_id,
            vocab_size = tokenizer.vocab_size(),
            "Tokenizer loaded from file"
        );
        Ok(tokenizer)
    }

    /// Wrap an already-built Hugging Face tokenizer.
    pub fn from_hf(inner: HfTokenizer) -> Self {
        let vocab = inner.get_vocab(true);
        let eos_token_id = EOS_CANDIDATES.iter().find_map(|c| vocab.get(*c).copied());
        Self { inner, eos_token_id }
    }

    /// Encode a text string to a sequence of token ids.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> CoreResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode a sequence of token ids back to a string.
    ///
    /// Ids that are not in the vocabulary are rejected. The underlying
    /// library would silently drop them.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        if let Some(unknown) = ids.iter().find(|&&id| self.inner.id_to_token(id).is_none()) {
            return Err(CoreError::Tokenizer(format!("Unknown token id: {unknown}")));
        }
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    /// The end-of-turn token id, if known.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// The size of the model vocabulary, added tokens included.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Look up the token id for an exact token string (e.g. `"</think>"`).
    pub fn token_id(&self, text: &str) -> Option<u32> {
        self.inner.token_to_id(text)
    }
}

impl Decoder for Tokenizer {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        Tokenizer::decode(self, ids, skip_special_tokens)
    }
}

impl Vocabulary for Tokenizer {
    fn token_id(&self, text: &str) -> Option<u32> {
        Tokenizer::token_id(self, text)
    }

    fn vocab_size(&self) -> usize {
        Tokenizer::vocab_size(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;
    use crate::delimiter::DelimiterSpec;
    use crate::split::ResponseSplitter;

    /// Word-level tokenizer with Qwen-style special tokens, small enough to
    /// reason about in assertions.
    pub(crate) const TOY_TOKENIZER_JSON: &str = r#"{
      "version": "1.0",
      "truncation": null,
      "padding": null,
      "added_tokens": [
        {"id": 5, "content": "<think>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
        {"id": 6, "content": "</think>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
        {"id": 7, "content": "<|im_end|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
      ],
      "normalizer": null,
      "pre_tokenizer": {"type": "Whitespace"},
      "post_processor": null,
      "decoder": null,
      "model": {
        "type": "WordLevel",
        "vocab": {"[UNK]": 0, "you": 1, "are": 2, "not": 3, "alone": 4, "<think>": 5, "</think>": 6, "<|im_end|>": 7},
        "unk_token": "[UNK]"
      }
    }"#;

    pub(crate) fn toy_tokenizer() -> (Tokenizer, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOY_TOKENIZER_JSON.as_bytes()).unwrap();
        let tok = Tokenizer::from_file(file.path()).unwrap();
        (tok, file)
    }

    #[test]
    fn loads_from_file() {
        let (tok, _file) = toy_tokenizer();
        assert_eq!(tok.vocab_size(), 8);
        assert_eq!(tok.eos_token_id(), Some(7));
        assert_eq!(tok.token_id("</think>"), Some(6));
        assert_eq!(tok.token_id("missing"), None);
    }

    #[test]
    fn missing_file_errors() {
        let result = Tokenizer::from_file(Path::new("/nonexistent/tokenizer.json"));
        assert!(matches!(result, Err(CoreError::Tokenizer(_))));
    }

    #[test]
    fn encodes_words() {
        let (tok, _file) = toy_tokenizer();
        assert_eq!(tok.encode("you are not alone", false).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_skips_special_tokens() {
        let (tok, _file) = toy_tokenizer();
        let text = tok.decode(&[5, 1, 2, 6, 3, 4, 7], true).unwrap();
        assert!(!text.contains("think"));
        assert!(!text.contains("im_end"));
        assert!(text.contains("you are"));
        assert!(text.contains("not alone"));
    }

    #[test]
    fn decode_rejects_unknown_ids() {
        let (tok, _file) = toy_tokenizer();
        let err = tok.decode(&[1, 42], true).unwrap_err();
        assert!(matches!(err, CoreError::Tokenizer(ref m) if m.contains("42")));
    }

    #[test]
    fn splitter_over_real_tokenizer() {
        let (tok, _file) = toy_tokenizer();
        let delimiter = DelimiterSpec::from_token("</think>").resolve(&tok).unwrap();
        let splitter = ResponseSplitter::new(delimiter, &tok);
        let out = splitter.split_decode(&[5, 1, 2, 6, 3, 4]).unwrap();
        assert_eq!(out.thinking, "you are");
        assert_eq!(out.content, "not alone");
    }
}
