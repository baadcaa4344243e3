//! Interchange records passed between pipeline stages.
//!
//! Fields a stage does not understand are carried through untouched
//! (`extra`), so each stage only owns the keys it writes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source post identifier. Scraped datasets use both numbers and strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostId {
    Int(i64),
    Str(String),
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Int(n) => write!(f, "{n}"),
            PostId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PostId {
    fn from(n: i64) -> Self {
        PostId::Int(n)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        PostId::Str(s.to_string())
    }
}

/// Raw help-seeking post (plan stage input).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Plan stage output: how many rounds the conversation has and what each
/// round focuses on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundPlan {
    pub post_id: PostId,
    #[serde(default)]
    pub file: Option<String>,
    pub rounds: u32,
    pub info_by_round: Vec<String>,
}

/// One patient/counsellor exchange.
///
/// `counselor` is the draft written by the dialogue stage. The counsel stage
/// adds the reasoning model's reply and its thinking trace alongside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub patient: String,
    #[serde(default)]
    pub counselor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counselor_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counselor_think: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DialogueTurn {
    /// The counsel stage still has to answer this turn.
    pub fn needs_counsel(&self) -> bool {
        let answered = self.counselor_content.as_deref().is_some_and(|c| !c.is_empty());
        !answered && !self.patient.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    pub post_id: PostId,
    #[serde(default)]
    pub conversation: Vec<DialogueTurn>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Review stage verdict for one dialogue.
///
/// `issues` normally holds criterion numbers 1 to 4 (see the review prompt),
/// but whatever the reviewer listed is kept as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub keep: bool,
    #[serde(default)]
    pub issues: Vec<Value>,
    pub reason: String,
    #[serde(default)]
    pub post_id: Option<PostId>,
}

impl Verdict {
    /// Verdict for a reply that could not be interpreted.
    pub fn rejected(error: impl fmt::Display, raw: &str) -> Self {
        Self {
            keep: false,
            issues: Vec::new(),
            reason: format!("Invalid model response: {error} | Raw output: {raw}"),
            post_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_id_accepts_numbers_and_strings() {
        let a: PostId = serde_json::from_value(json!(42)).unwrap();
        let b: PostId = serde_json::from_value(json!("t3_abc")).unwrap();
        assert_eq!(a, PostId::Int(42));
        assert_eq!(b.to_string(), "t3_abc");
        assert_eq!(serde_json::to_value(&a).unwrap(), json!(42));
    }

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "post_id": 7,
            "title": "sleepless",
            "conversation": [
                {"round": 1, "patient": "I can't sleep.", "counselor": "That is hard.", "mood": "low"}
            ]
        });
        let d: Dialogue = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(d.extra["title"], "sleepless");
        assert_eq!(d.conversation[0].extra["mood"], "low");
        assert_eq!(serde_json::to_value(&d).unwrap(), raw);
    }

    #[test]
    fn needs_counsel_rules() {
        let pending = DialogueTurn { patient: "hi".into(), ..Default::default() };
        assert!(pending.needs_counsel());

        let empty_reply = DialogueTurn {
            patient: "hi".into(),
            counselor_content: Some(String::new()),
            ..Default::default()
        };
        assert!(empty_reply.needs_counsel());

        let answered = DialogueTurn {
            patient: "hi".into(),
            counselor_content: Some("hello".into()),
            ..Default::default()
        };
        assert!(!answered.needs_counsel());

        assert!(!DialogueTurn::default().needs_counsel());
    }

    #[test]
    fn rejected_verdict_keeps_raw_output() {
        let v = Verdict::rejected("missing field `keep`", "{\"reason\":\"ok\"}");
        assert!(!v.keep);
        assert!(v.issues.is_empty());
        assert_eq!(v.reason, "Invalid model response: missing field `keep` | Raw output: {\"reason\":\"ok\"}");
    }
}
