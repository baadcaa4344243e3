//! # psyllm-core
//!
//! Inference-side building blocks for PsyLLM.
//!
//! The centre of the crate is [`split`]: after a reasoning model finishes
//! generating, its output ids are partitioned at the last `</think>`
//! delimiter into a thinking trace and a user-facing answer, and each span
//! is decoded separately.
//!
//! ```
//! use psyllm_core::split::split;
//!
//! let segments = split(&[10, 20, 151668, 30, 40], 151668);
//! assert_eq!(segments.thinking, &[10, 20, 151668]);
//! assert_eq!(segments.content, &[30, 40]);
//! ```
//!
//! Everything else (tokenizer wrapper, Qwen3 chat template, Qwen3 generator,
//! device selection) exists to produce the id sequence the splitter consumes.
//!
//! ## Feature Flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable CUDA GPU acceleration |
//! | `metal` | Enable Apple Metal GPU acceleration |

pub mod chat_template;
pub mod delimiter;
pub mod device;
pub mod error;
pub mod model;
pub mod qwen3;
pub mod split;
pub mod tokenizer;

pub use delimiter::{DelimiterSpec, ThinkDelimiter};
pub use device::select_device;
pub use error::{CoreError, CoreResult};
pub use model::{Decoder, GenerateInput, GenerateOutput, Generator, ModelConfig, SamplingParams};
pub use qwen3::Qwen3Model;
pub use split::{split, ResponseSplitter, Segments, SplitResponse};
pub use tokenizer::Tokenizer;
