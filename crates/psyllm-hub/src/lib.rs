//! # psyllm-hub
//!
//! Fetches PsyLLM checkpoints from the Hugging Face Hub into a local cache
//! that the Qwen3 loader in `psyllm-core` reads directly.
//!
//! ```rust,no_run
//! use psyllm_hub::{ModelCache, ModelDownloader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = ModelCache::default_cache()?;
//!     let downloader = ModelDownloader::new(cache)?;
//!     let files = downloader.pull("GMLHUHE/PsyLLM", "main", None).await?;
//!     println!("{} files cached", files.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod download;
pub mod error;
pub mod integrity;

pub use cache::{CachedModel, FileMetadata, ModelCache};
pub use download::ModelDownloader;
pub use error::{HubError, HubResult};
