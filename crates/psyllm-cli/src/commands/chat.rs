use std::io::{self, BufRead, Write};

use anyhow::Context;
use tracing::{debug, info};

use psyllm_core::chat_template::{build_chat_prompt, stop_token_ids};
use psyllm_core::{
    CoreResult, Decoder, DelimiterSpec, GenerateInput, GenerateOutput, Generator, ResponseSplitter, SplitResponse,
};

use crate::config::AppConfig;
use crate::SamplingArgs;

pub struct ChatOptions {
    pub model: Option<String>,
    pub system: Option<String>,
    pub enable_thinking: bool,
    pub show_think: bool,
    pub prefer_gpu: bool,
    pub sampling: SamplingArgs,
    pub delimiter: DelimiterSpec,
}

/// What the user typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Clear,
    Think(bool),
    Unknown(&'a str),
    Message(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/clear" => Input::Clear,
        "/think on" => Input::Think(true),
        "/think off" => Input::Think(false),
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        msg => Input::Message(msg),
    }
}

/// Start an interactive multi-turn chat session.
///
/// The model is loaded once. History keeps only the answer part of each
/// reply; thinking traces are shown (with `--show-think`) but never fed back.
pub async fn run(opts: ChatOptions, config: &AppConfig) -> anyhow::Result<()> {
    let repo_id = opts.model.as_deref().unwrap_or(&config.model.repo_id).to_string();
    let mut model = super::load_model(config, &repo_id, opts.prefer_gpu).await?;
    let tokenizer = model.tokenizer_arc();
    let delimiter = opts.delimiter.resolve(tokenizer.as_ref()).context("Invalid split delimiter")?;
    let splitter = ResponseSplitter::new(delimiter, tokenizer.clone());

    let system = opts.system.clone().unwrap_or_else(|| config.inference.system_prompt.clone());
    let params = opts.sampling.to_params(&config.inference, stop_token_ids(&tokenizer));
    let mut thinking = opts.enable_thinking;
    let mut history: Vec<(String, String)> = Vec::new();

    println!("\nPsyLLM Chat  |  model: {repo_id}  |  thinking: {}  |  type /quit to exit\n", on_off(thinking));

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!(">>> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }

        let message = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Clear => {
                history.clear();
                println!("(history cleared)");
                continue;
            }
            Input::Think(on) => {
                thinking = on;
                println!("(thinking {})", on_off(on));
                continue;
            }
            Input::Unknown(cmd) => {
                println!("Unknown command {cmd}. Try /quit, /clear, /think on, /think off.");
                continue;
            }
            Input::Message(msg) => msg.to_string(),
        };

        let formatted = build_chat_prompt(&system, &history, &message, thinking);
        let token_ids = tokenizer.encode(&formatted, false)?;
        debug!(prompt_tokens = token_ids.len(), turns = history.len(), "Chat turn");

        let turn_params = params.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = model.generate(GenerateInput { token_ids }, &turn_params);
            (model, result)
        })
        .await
        .context("Generation task panicked")?;
        model = returned;

        let reply = match split_reply(&splitter, result) {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        if opts.show_think && !reply.thinking.is_empty() {
            println!("thinking content: {}\n", reply.thinking);
        }
        println!("{}\n", reply.content);
        history.push((message, reply.content));
    }

    info!(turns = history.len(), "Chat session ended");
    Ok(())
}

/// A failed generation or decode costs one turn, not the session.
fn split_reply<D: Decoder>(
    splitter: &ResponseSplitter<D>,
    result: CoreResult<GenerateOutput>,
) -> CoreResult<SplitResponse> {
    splitter.split_decode(result?.completion())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyllm_core::{CoreError, ThinkDelimiter};

    #[test]
    fn slash_commands() {
        assert_eq!(parse_input("/quit\n"), Input::Quit);
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(parse_input("  /clear "), Input::Clear);
        assert_eq!(parse_input("/think off"), Input::Think(false));
        assert_eq!(parse_input("/think on"), Input::Think(true));
        assert_eq!(parse_input("/thinking"), Input::Unknown("/thinking"));
    }

    struct Digits;

    impl Decoder for Digits {
        // Id 0 plays the special closing token.
        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
            match ids.iter().find(|&&id| id > 9) {
                Some(id) => Err(CoreError::Tokenizer(format!("unknown id {id}"))),
                None => Ok(ids
                    .iter()
                    .filter(|&&id| !(skip_special_tokens && id == 0))
                    .map(|id| id.to_string())
                    .collect()),
            }
        }
    }

    fn splitter() -> ResponseSplitter<Digits> {
        ResponseSplitter::new(ThinkDelimiter::new(0), Digits)
    }

    #[test]
    fn reply_splits_completion_only() {
        let output = GenerateOutput { sequence: vec![7, 7, 1, 2, 0, 3], prompt_len: 2 };
        let reply = split_reply(&splitter(), Ok(output)).unwrap();
        assert_eq!(reply.thinking, "12");
        assert_eq!(reply.content, "3");
    }

    #[test]
    fn decode_failure_is_a_turn_error() {
        let output = GenerateOutput { sequence: vec![1, 0, 42], prompt_len: 0 };
        let err = split_reply(&splitter(), Ok(output)).unwrap_err();
        assert!(err.to_string().contains("unknown id 42"));

        let failed = Err(CoreError::PromptTooLong { got: 50_000, max: 40_960 });
        assert!(matches!(split_reply(&splitter(), failed), Err(CoreError::PromptTooLong { .. })));
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_input("I can't sleep lately.\n"), Input::Message("I can't sleep lately."));
        assert_eq!(parse_input("   \n"), Input::Empty);
    }
}
