//! Stage 3: answer every patient turn with a reasoning model and keep its
//! thinking trace next to the reply.
//!
//! Dialogues are updated in place. The output file doubles as the resume
//! point: turns that already carry `counselor_content` are skipped.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::StageContext;
use crate::client::{ChatClient, ChatMessage, ChatReply, ChatRequest};
use crate::error::SynthResult;
use crate::prompts::COUNSEL_SYSTEM_PROMPT;
use crate::records::Dialogue;
use crate::runner::{RunStats, Sink};
use crate::settings::SynthSettings;
use crate::store::{load_records, save_json_atomic};

/// One unanswered turn and the conversation leading up to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CounselTask {
    pub dialogue: usize,
    pub turn: usize,
    pub messages: Vec<ChatMessage>,
}

/// Collect a task for every turn that still needs a counsellor reply.
///
/// History lists earlier turns in order (patient as user, counsellor reply as
/// assistant, empty sides omitted) and ends with the current patient message.
pub fn pending_tasks(dialogues: &[Dialogue]) -> Vec<CounselTask> {
    let mut tasks = Vec::new();
    for (d, dialogue) in dialogues.iter().enumerate() {
        for (t, turn) in dialogue.conversation.iter().enumerate() {
            if !turn.needs_counsel() {
                continue;
            }
            let mut messages = Vec::with_capacity(t * 2 + 1);
            for prev in &dialogue.conversation[..t] {
                if !prev.patient.is_empty() {
                    messages.push(ChatMessage::user(prev.patient.clone()));
                }
                if let Some(reply) = prev.counselor_content.as_deref().filter(|c| !c.is_empty()) {
                    messages.push(ChatMessage::assistant(reply));
                }
            }
            messages.push(ChatMessage::user(turn.patient.clone()));
            tasks.push(CounselTask { dialogue: d, turn: t, messages });
        }
    }
    tasks
}

pub async fn counsel_turn(
    client: &dyn ChatClient,
    settings: &SynthSettings,
    task: &CounselTask,
) -> SynthResult<ChatReply> {
    let mut messages = Vec::with_capacity(task.messages.len() + 1);
    messages.push(ChatMessage::system(COUNSEL_SYSTEM_PROMPT));
    messages.extend(task.messages.iter().cloned());
    let request = ChatRequest { model: settings.reasoner_model.clone(), messages, temperature: settings.temperature };
    client.complete(&request).await
}

/// Writes replies back into the dialogues and saves the whole set.
struct DialogueUpdater {
    dialogues: Vec<Dialogue>,
    output: PathBuf,
}

impl Sink<(usize, usize, ChatReply)> for DialogueUpdater {
    fn accept(&mut self, (d, t, reply): (usize, usize, ChatReply)) -> SynthResult<()> {
        let dialogue = &mut self.dialogues[d];
        if reply.reasoning_content.is_none() {
            warn!(post_id = %dialogue.post_id, round = t + 1, "Reply carried no reasoning trace");
        }
        let turn = &mut dialogue.conversation[t];
        turn.counselor_content = Some(reply.content);
        turn.counselor_think = reply.reasoning_content;
        Ok(())
    }

    fn checkpoint(&mut self) -> SynthResult<()> {
        save_json_atomic(&self.output, &self.dialogues)
    }
}

/// Answer pending turns. Reads `output` when it exists (an earlier, partial
/// run), otherwise `input`.
pub async fn run(ctx: &StageContext, input: &Path, output: &Path) -> SynthResult<RunStats> {
    let source = if output.is_file() { output } else { input };
    let dialogues: Vec<Dialogue> = load_records(source)?;
    let tasks = pending_tasks(&dialogues);
    if tasks.is_empty() {
        info!(source = %source.display(), "No pending conversation rounds");
        return Ok(RunStats::default());
    }
    info!(dialogues = dialogues.len(), pending = tasks.len(), source = %source.display(), "Answering turns");

    let client = ctx.client.as_ref();
    let settings = &ctx.settings;
    let mut sink = DialogueUpdater { dialogues, output: output.to_path_buf() };
    let stats = ctx
        .runner
        .clone()
        .with_save_every(settings.save_every)
        .run(
            "counsel",
            tasks,
            move |task| async move {
                counsel_turn(client, settings, &task).await.map(|reply| (task.dialogue, task.turn, reply))
            },
            &mut sink,
        )
        .await?;

    sink.checkpoint()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Role;
    use crate::records::{DialogueTurn, PostId};
    use crate::stages::testing::{context, ScriptedClient};

    fn turn(round: u32, patient: &str, reply: Option<&str>) -> DialogueTurn {
        DialogueTurn {
            round,
            patient: patient.into(),
            counselor: "draft".into(),
            counselor_content: reply.map(str::to_string),
            ..Default::default()
        }
    }

    fn dialogue(id: i64, turns: Vec<DialogueTurn>) -> Dialogue {
        Dialogue { post_id: PostId::Int(id), conversation: turns, extra: Default::default() }
    }

    #[test]
    fn history_is_chronological_and_ends_with_current_turn() {
        let dialogues = vec![dialogue(
            1,
            vec![turn(1, "first", Some("reply one")), turn(2, "", None), turn(3, "third", None)],
        )];
        let tasks = pending_tasks(&dialogues);

        assert_eq!(tasks.len(), 1, "turns without patient text are skipped");
        let task = &tasks[0];
        assert_eq!((task.dialogue, task.turn), (0, 2));
        let flow: Vec<(Role, &str)> = task.messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            flow,
            vec![(Role::User, "first"), (Role::Assistant, "reply one"), (Role::User, "third")]
        );
    }

    #[test]
    fn answered_turns_produce_no_tasks() {
        let dialogues = vec![dialogue(1, vec![turn(1, "hi", Some("hello"))])];
        assert!(pending_tasks(&dialogues).is_empty());
    }

    #[tokio::test]
    async fn run_fills_replies_and_thinking() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dialogues.json");
        let output = dir.path().join("counselled.json");
        save_json_atomic(&input, &[dialogue(5, vec![turn(1, "I can't focus.", None)])]).unwrap();

        let client = ScriptedClient::new(vec![Ok(ChatReply {
            content: "That sounds exhausting.".into(),
            reasoning_content: Some("The client reports attention problems.".into()),
        })]);
        let stats = run(&context(client.clone()), &input, &output).await.unwrap();
        assert_eq!(stats, RunStats { succeeded: 1, failed: 0 });

        let sent = client.requests();
        assert_eq!(sent[0].model, "deepseek-reasoner");
        assert_eq!(sent[0].messages[0].role, Role::System);

        let saved: Vec<Dialogue> = load_records(&output).unwrap();
        let t = &saved[0].conversation[0];
        assert_eq!(t.counselor_content.as_deref(), Some("That sounds exhausting."));
        assert_eq!(t.counselor_think.as_deref(), Some("The client reports attention problems."));
        assert_eq!(t.counselor, "draft");
    }

    #[tokio::test]
    async fn existing_output_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dialogues.json");
        let output = dir.path().join("counselled.json");
        save_json_atomic(&input, &[dialogue(5, vec![turn(1, "pending", None)])]).unwrap();
        save_json_atomic(&output, &[dialogue(5, vec![turn(1, "pending", Some("done"))])]).unwrap();

        let client = ScriptedClient::new(vec![]);
        let stats = run(&context(client.clone()), &input, &output).await.unwrap();
        assert_eq!(stats.total(), 0);
        assert!(client.requests().is_empty());
    }
}
