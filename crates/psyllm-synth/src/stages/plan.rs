//! Stage 1: decide how many counselling rounds a post needs and what each
//! round should focus on.
//!
//! Output is NDJSON appended one plan at a time, so an interrupted run
//! resumes by skipping every `post_id` already in the file.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use super::StageContext;
use crate::client::{ChatClient, ChatMessage, ChatRequest};
use crate::error::{SynthError, SynthResult};
use crate::extract::parse_json_reply;
use crate::prompts::plan_prompt;
use crate::records::{Post, RoundPlan};
use crate::runner::RunStats;
use crate::settings::SynthSettings;
use crate::store::{load_records, processed_ids, NdjsonWriter};

pub async fn plan_post(client: &dyn ChatClient, settings: &SynthSettings, post: &Post) -> SynthResult<RoundPlan> {
    let request = ChatRequest {
        model: settings.chat_model.clone(),
        messages: vec![ChatMessage::system(""), ChatMessage::user(plan_prompt(&post.content))],
        temperature: settings.temperature,
    };
    let reply = client.complete(&request).await?;
    let value: Value = parse_json_reply(&reply.content)?;

    let rounds = value.get("rounds").and_then(as_count);
    let info_by_round = value.get("info_by_round").and_then(as_string_list);
    match (rounds, info_by_round) {
        (Some(rounds), Some(info_by_round)) => Ok(RoundPlan {
            post_id: post.post_id.clone(),
            file: post.file.clone(),
            rounds,
            info_by_round,
        }),
        _ => Err(SynthError::InvalidRecord(format!(
            "plan for post {} is missing rounds or info_by_round",
            post.post_id
        ))),
    }
}

/// Plan every post in `input` (JSON array or NDJSON) not yet in `output`.
pub async fn run(ctx: &StageContext, input: &Path, output: &Path) -> SynthResult<RunStats> {
    let posts: Vec<Post> = load_records(input)?;
    let mut seen = processed_ids(output)?;
    let total = posts.len();
    let todo: Vec<Post> = posts.into_iter().filter(|p| seen.insert(p.post_id.clone())).collect();
    info!(total, remaining = todo.len(), output = %output.display(), "Planning rounds");

    let client = ctx.client.as_ref();
    let settings = &ctx.settings;
    let mut sink = NdjsonWriter::append(output)?;
    ctx.runner
        .run("plan", todo, move |post| async move { plan_post(client, settings, &post).await }, &mut sink)
        .await
}

fn as_count(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string_list(v: &Value) -> Option<Vec<String>> {
    let items = v.as_array()?;
    Some(
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}
