//! Stage 4: judge each finished dialogue and record whether to keep it.
//!
//! A reply that is not a well-formed verdict never fails the item. It becomes
//! a rejection whose reason carries the parse error and the raw text.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::info;

use super::StageContext;
use crate::client::{ChatClient, ChatMessage, ChatRequest};
use crate::error::SynthResult;
use crate::extract::strip_code_fence;
use crate::prompts::REVIEW_SYSTEM_PROMPT;
use crate::records::{Dialogue, PostId, Verdict};
use crate::runner::{RunStats, Sink};
use crate::settings::SynthSettings;
use crate::store::{checkpoint_path, load_existing, load_records, save_json_atomic};

/// All three keys are required; `issues` itself may be loosely shaped.
#[derive(Deserialize)]
struct ReviewReply {
    keep: bool,
    #[serde(deserialize_with = "issue_list")]
    issues: Vec<Value>,
    reason: String,
}

/// `null` is an empty list and a lone value a one-element list. Numeric
/// strings become numbers.
fn issue_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => match s.trim().parse::<u64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(s),
            },
            other => other,
        })
        .collect())
}

/// Interpret a reviewer reply.
pub fn parse_verdict(raw: &str) -> Verdict {
    let text = strip_code_fence(raw);
    match serde_json::from_str::<ReviewReply>(text) {
        Ok(r) => Verdict { keep: r.keep, issues: r.issues, reason: r.reason, post_id: None },
        Err(e) => Verdict::rejected(e, text),
    }
}

pub async fn review_dialogue(
    client: &dyn ChatClient,
    settings: &SynthSettings,
    dialogue: &Dialogue,
) -> SynthResult<Verdict> {
    let request = ChatRequest {
        model: settings.chat_model.clone(),
        messages: vec![
            ChatMessage::system(REVIEW_SYSTEM_PROMPT),
            ChatMessage::user(serde_json::to_string(dialogue)?),
        ],
        temperature: 0.0,
    };
    let reply = client.complete(&request).await?;
    let mut verdict = parse_verdict(&reply.content);
    verdict.post_id = Some(dialogue.post_id.clone());
    Ok(verdict)
}

/// Holds verdicts from earlier runs plus new ones tagged with their input
/// position, so the saved file follows input order.
struct VerdictSink {
    earlier: Vec<Verdict>,
    fresh: Vec<(usize, Verdict)>,
    checkpoint: PathBuf,
}

impl VerdictSink {
    fn ordered(&self) -> Vec<Verdict> {
        let mut fresh = self.fresh.clone();
        fresh.sort_by_key(|(idx, _)| *idx);
        self.earlier.iter().cloned().chain(fresh.into_iter().map(|(_, v)| v)).collect()
    }
}

impl Sink<(usize, Verdict)> for VerdictSink {
    fn accept(&mut self, item: (usize, Verdict)) -> SynthResult<()> {
        self.fresh.push(item);
        Ok(())
    }

    fn checkpoint(&mut self) -> SynthResult<()> {
        save_json_atomic(&self.checkpoint, &self.ordered())
    }
}

/// Review every dialogue in `input` without a verdict in `output`.
pub async fn run(ctx: &StageContext, input: &Path, output: &Path) -> SynthResult<RunStats> {
    let dialogues: Vec<Dialogue> = load_records(input)?;
    let earlier: Vec<Verdict> = load_existing(output)?;
    let judged: HashSet<PostId> = earlier.iter().filter_map(|v| v.post_id.clone()).collect();
    let total = dialogues.len();
    let todo: Vec<(usize, Dialogue)> =
        dialogues.into_iter().enumerate().filter(|(_, d)| !judged.contains(&d.post_id)).collect();
    info!(total, done = earlier.len(), remaining = todo.len(), "Reviewing dialogues");

    let client = ctx.client.as_ref();
    let settings = &ctx.settings;
    let mut sink = VerdictSink { earlier, fresh: Vec::new(), checkpoint: checkpoint_path(output) };
    let stats = ctx
        .runner
        .run(
            "review",
            todo,
            move |(idx, dialogue)| async move {
                review_dialogue(client, settings, &dialogue).await.map(|v| (idx, v))
            },
            &mut sink,
        )
        .await?;

    let verdicts = sink.ordered();
    save_json_atomic(output, &verdicts)?;
    let kept = verdicts.iter().filter(|v| v.keep).count();
    info!(output = %output.display(), kept, rejected = verdicts.len() - kept, "Review finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::DialogueTurn;
    use crate::stages::testing::{context, ScriptedClient};

    fn dialogue(id: &str) -> Dialogue {
        Dialogue {
            post_id: PostId::from(id),
            conversation: vec![DialogueTurn {
                round: 1,
                patient: "I keep overthinking.".into(),
                counselor_content: Some("Let's slow down together.".into()),
                counselor_think: Some("Rumination; CBT reframing fits.".into()),
                ..Default::default()
            }],
            extra: Default::default(),
        }
    }

    #[test]
    fn parses_fenced_verdict() {
        let v = parse_verdict("```json\n{\"keep\": false, \"issues\": [1, 3], \"reason\": \"thin reasoning\"}\n```");
        assert!(!v.keep);
        assert_eq!(v.issues, vec![Value::from(1), Value::from(3)]);
        assert_eq!(v.reason, "thin reasoning");
    }

    #[test]
    fn null_issues_keep_the_verdict() {
        let v = parse_verdict("{\"keep\": true, \"issues\": null, \"reason\": \"solid\"}");
        assert!(v.keep);
        assert!(v.issues.is_empty());
        assert_eq!(v.reason, "solid");
    }

    #[test]
    fn string_issues_are_accepted() {
        let v = parse_verdict("{\"keep\": true, \"issues\": [\"1\", \"tone\"], \"reason\": \"minor\"}");
        assert!(v.keep);
        assert_eq!(v.issues, vec![Value::from(1), Value::from("tone")]);
    }

    #[test]
    fn missing_key_becomes_rejection() {
        let v = parse_verdict("{\"keep\": true, \"reason\": \"fine\"}");
        assert!(!v.keep);
        assert!(v.issues.is_empty());
        assert!(v.reason.starts_with("Invalid model response: "));
        assert!(v.reason.ends_with("| Raw output: {\"keep\": true, \"reason\": \"fine\"}"));
    }

    #[test]
    fn prose_becomes_rejection() {
        let v = parse_verdict("Looks good to me.");
        assert!(!v.keep);
        assert!(v.reason.contains("Raw output: Looks good to me."));
    }

    #[tokio::test]
    async fn review_sends_dialogue_at_zero_temperature() {
        let client = ScriptedClient::new(vec![ScriptedClient::text(
            "{\"keep\": true, \"issues\": [], \"reason\": \"coherent\"}",
        )]);
        let ctx = context(client.clone());
        let v = review_dialogue(ctx.client.as_ref(), &ctx.settings, &dialogue("t3_x")).await.unwrap();

        assert!(v.keep);
        assert_eq!(v.post_id, Some(PostId::from("t3_x")));
        let sent = client.requests();
        assert_eq!(sent[0].temperature, 0.0);
        assert!(sent[0].messages[1].content.contains("\"counselor_think\""));
    }

    #[tokio::test]
    async fn run_skips_judged_and_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("counselled.json");
        let output = dir.path().join("verdicts.json");
        save_json_atomic(&input, &[dialogue("a"), dialogue("b"), dialogue("c")]).unwrap();
        let earlier = Verdict { keep: true, issues: Vec::new(), reason: "ok".into(), post_id: Some(PostId::from("a")) };
        save_json_atomic(&output, &[earlier]).unwrap();

        let client = ScriptedClient::new(vec![
            ScriptedClient::text("{\"keep\": true, \"issues\": [], \"reason\": \"b ok\"}"),
            ScriptedClient::text("not a verdict"),
        ]);
        let stats = run(&context(client.clone()), &input, &output).await.unwrap();

        assert_eq!(stats, RunStats { succeeded: 2, failed: 0 });
        let verdicts: Vec<Verdict> = load_records(&output).unwrap();
        let ids: Vec<_> = verdicts.iter().map(|v| v.post_id.clone().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(verdicts[1].keep);
        assert!(!verdicts[2].keep);
        assert!(!checkpoint_path(&output).exists());
    }
}
