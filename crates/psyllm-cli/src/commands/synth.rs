use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::ValueEnum;

use psyllm_synth::stages::{self, StageContext};
use psyllm_synth::{OpenAiClient, SynthSettings};

/// Pipeline stage, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Posts to round plans.
    Plan,
    /// Round plans to dialogues.
    Dialogue,
    /// Dialogues to reasoning-annotated dialogues.
    Counsel,
    /// Annotated dialogues to keep/drop verdicts.
    Review,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Plan => "plan",
            Stage::Dialogue => "dialogue",
            Stage::Counsel => "counsel",
            Stage::Review => "review",
        };
        f.write_str(name)
    }
}

pub async fn run(stage: Stage, input: &Path, output: &Path, settings: SynthSettings) -> anyhow::Result<()> {
    let client = OpenAiClient::from_settings(&settings).context("Failed to create chat client")?;
    let ctx = StageContext::new(Arc::new(client), settings);

    let stats = match stage {
        Stage::Plan => stages::plan::run(&ctx, input, output).await,
        Stage::Dialogue => stages::dialogue::run(&ctx, input, output).await,
        Stage::Counsel => stages::counsel::run(&ctx, input, output).await,
        Stage::Review => stages::review::run(&ctx, input, output).await,
    }
    .with_context(|| format!("{stage} stage failed"))?;

    println!(
        "{stage}: {} succeeded, {} failed -> {}",
        stats.succeeded,
        stats.failed,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_keys_fail_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            Stage::Plan,
            &dir.path().join("posts.json"),
            &dir.path().join("plans.jsonl"),
            SynthSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("No API keys"));
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Counsel.to_string(), "counsel");
        assert_eq!(Stage::from_str("review", true).unwrap(), Stage::Review);
    }
}
