//! Qwen3 ChatML prompt formatting.
//!
//! PsyLLM keeps the Qwen3 chat template unchanged. The only switch it adds to
//! plain ChatML is thinking mode: with thinking disabled the assistant turn is
//! pre-filled with an empty `<think>` block so the model answers directly.
//!
//! ```text
//! <|im_start|>system\n{system}<|im_end|>\n
//! <|im_start|>user\n{user}<|im_end|>\n
//! <|im_start|>assistant\n{content}<|im_end|>\n
//! <|im_start|>user\n{user_msg}<|im_end|>\n
//! <|im_start|>assistant\n
//! ```

use crate::tokenizer::Tokenizer;

/// Assistant pre-fill used when thinking mode is off.
pub const EMPTY_THINK_BLOCK: &str = "<think>\n\n</think>\n\n";

/// End-of-turn tokens that terminate generation.
pub const STOP_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>"];

// ── Public API ────────────────────────────────────────────────────────────────

/// Build a full multi-turn prompt, ready for tokenisation with
/// `add_special_tokens: false`.
///
/// `history` holds `(user_message, assistant_content)` pairs in
/// chronological order. Assistant entries must be the content segment of a
/// previous reply only; thinking traces are never fed back.
///
/// An empty `system` omits the system block entirely.
pub fn build_chat_prompt(
    system: &str,
    history: &[(String, String)],
    user_msg: &str,
    enable_thinking: bool,
) -> String {
    let mut s = String::new();
    if !system.is_empty() {
        s.push_str(&format!("<|im_start|>system\n{system}<|im_end|>\n"));
    }
    for (user, asst) in history {
        s.push_str(&format!(
            "<|im_start|>user\n{user}<|im_end|>\n\
             <|im_start|>assistant\n{asst}<|im_end|>\n"
        ));
    }
    s.push_str(&format!(
        "<|im_start|>user\n{user_msg}<|im_end|>\n\
         <|im_start|>assistant\n"
    ));
    if !enable_thinking {
        s.push_str(EMPTY_THINK_BLOCK);
    }
    s
}

/// Resolve [`STOP_TOKENS`] against a tokenizer, skipping any it lacks.
pub fn stop_token_ids(tokenizer: &Tokenizer) -> Vec<u32> {
    STOP_TOKENS
        .iter()
        .filter_map(|t| tokenizer.token_id(t))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_turn_with_system() {
        let out = build_chat_prompt("You are a counsellor.", &[], "I can't sleep.", true);
        assert!(out.starts_with("<|im_start|>system\nYou are a counsellor.<|im_end|>\n"));
        assert!(out.contains("<|im_start|>user\nI can't sleep.<|im_end|>"));
        assert!(out.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn empty_system_is_omitted() {
        let out = build_chat_prompt("", &[], "hello", true);
        assert!(!out.contains("<|im_start|>system"), "system block must be absent");
        assert_eq!(out, "<|im_start|>user\nhello<|im_end|>\n<|im_start|>assistant\n");
    }

    #[test]
    fn thinking_disabled_prefills_empty_block() {
        let out = build_chat_prompt("", &[], "hello", false);
        assert!(out.ends_with("<|im_start|>assistant\n<think>\n\n</think>\n\n"));
    }

    #[test]
    fn thinking_enabled_leaves_assistant_open() {
        let out = build_chat_prompt("", &[], "hello", true);
        assert!(!out.contains("<think>"));
    }

    #[test]
    fn history_is_rendered_in_order() {
        let history = vec![
            ("first".to_string(), "first reply".to_string()),
            ("second".to_string(), "second reply".to_string()),
        ];
        let out = build_chat_prompt("sys", &history, "third", true);
        let first = out.find("first reply").unwrap();
        let second = out.find("second reply").unwrap();
        let third = out.find("third").unwrap();
        assert!(first < second && second < third);
        assert!(out.contains("<|im_start|>assistant\nfirst reply<|im_end|>\n"));
        assert_eq!(out.matches("<|im_start|>assistant\n").count(), 3);
    }

    #[test]
    fn stop_ids_resolve_known_tokens_only() {
        let (tok, _file) = crate::tokenizer::tests::toy_tokenizer();
        // The toy vocabulary has <|im_end|> but not <|endoftext|>.
        assert_eq!(stop_token_ids(&tok), vec![7]);
    }
}
