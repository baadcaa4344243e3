//! Stage 2: turn a round plan into a patient/counsellor conversation.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::StageContext;
use crate::client::{ChatClient, ChatMessage, ChatRequest};
use crate::error::{SynthError, SynthResult};
use crate::extract::parse_json_reply;
use crate::prompts::{dialogue_user_message, DIALOGUE_SYSTEM_PROMPT};
use crate::records::{Dialogue, DialogueTurn, PostId, RoundPlan};
use crate::runner::RunStats;
use crate::settings::SynthSettings;
use crate::store::{load_existing, load_records, save_json_atomic, JsonArraySink};

#[derive(Deserialize)]
struct DialogueReply {
    conversation: Vec<DialogueTurn>,
}

pub async fn build_dialogue(
    client: &dyn ChatClient,
    settings: &SynthSettings,
    plan: &RoundPlan,
) -> SynthResult<Dialogue> {
    let request = ChatRequest {
        model: settings.chat_model.clone(),
        messages: vec![
            ChatMessage::system(DIALOGUE_SYSTEM_PROMPT),
            ChatMessage::user(dialogue_user_message(&plan.info_by_round)),
        ],
        temperature: settings.temperature,
    };
    let reply = client.complete(&request).await?;
    let parsed: DialogueReply = parse_json_reply(&reply.content)?;
    if parsed.conversation.is_empty() {
        return Err(SynthError::InvalidRecord(format!("empty conversation for post {}", plan.post_id)));
    }

    let mut extra = serde_json::Map::new();
    if let Some(file) = &plan.file {
        extra.insert("file".into(), file.clone().into());
    }
    Ok(Dialogue { post_id: plan.post_id.clone(), conversation: parsed.conversation, extra })
}

/// Build dialogues for every plan in `input` whose post is not yet in
/// `output` (or its `.temp` checkpoint).
pub async fn run(ctx: &StageContext, input: &Path, output: &Path) -> SynthResult<RunStats> {
    let plans: Vec<RoundPlan> = load_records(input)?;
    let existing: Vec<Dialogue> = load_existing(output)?;
    let mut seen: HashSet<PostId> = existing.iter().map(|d| d.post_id.clone()).collect();
    let total = plans.len();
    let todo: Vec<RoundPlan> = plans.into_iter().filter(|p| seen.insert(p.post_id.clone())).collect();
    info!(total, done = existing.len(), remaining = todo.len(), "Building dialogues");

    let client = ctx.client.as_ref();
    let settings = &ctx.settings;
    let mut sink = JsonArraySink::new(existing, output);
    let stats = ctx
        .runner
        .run("dialogue", todo, move |plan| async move { build_dialogue(client, settings, &plan).await }, &mut sink)
        .await?;

    save_json_atomic(output, sink.records())?;
    info!(output = %output.display(), dialogues = sink.records().len(), "Dialogues saved");
    Ok(stats)
}
