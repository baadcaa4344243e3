//! # psyllm-synth
//!
//! The four-stage pipeline that turns raw help-seeking posts into reviewed,
//! reasoning-annotated counselling dialogues:
//!
//! | Stage | Input | Output |
//! |---|---|---|
//! | [`stages::plan`] | posts (JSON array) | round plans (NDJSON, appended) |
//! | [`stages::dialogue`] | round plans | dialogues (JSON array) |
//! | [`stages::counsel`] | dialogues | dialogues with `counselor_content` / `counselor_think` |
//! | [`stages::review`] | dialogues | verdicts (JSON array) |
//!
//! Every stage talks to an OpenAI-compatible chat endpoint through
//! [`ChatClient`], is resumable, and checkpoints while it runs.

pub mod client;
pub mod error;
pub mod extract;
pub mod prompts;
pub mod records;
pub mod runner;
pub mod settings;
pub mod stages;
pub mod store;

pub use client::{ChatClient, ChatMessage, ChatReply, ChatRequest, OpenAiClient, Role};
pub use error::{SynthError, SynthResult};
pub use records::{Dialogue, DialogueTurn, Post, PostId, RoundPlan, Verdict};
pub use runner::{RunStats, Runner};
pub use settings::SynthSettings;
