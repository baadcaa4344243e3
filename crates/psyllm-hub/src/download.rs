use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use hf_hub::{
    api::tokio::{Api, ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use psyllm_core::qwen3::shard_files;
use tracing::{debug, info, warn};

use crate::{
    cache::{
        FileMetadata, ModelCache, CONFIG_FILE, PARTIAL_SUFFIX, SAFETENSORS_INDEX,
        SAFETENSORS_SINGLE, TOKENIZER_FILE,
    },
    error::{HubError, HubResult},
    integrity::sha256_file,
};

/// Files that improve fidelity when present but are not needed to load.
const OPTIONAL_FILES: &[&str] = &["tokenizer_config.json", "generation_config.json"];

const PB_TEMPLATE_SIZED: &str =
    "{wide_msg}\n[{bar:50.cyan/blue}] {bytes}/{total_bytes}  {bytes_per_sec}  ETA {eta}";
const PB_TEMPLATE_SPINNER: &str =
    "{spinner:.green} {wide_msg}  {bytes}  {bytes_per_sec}  [{elapsed_precise}]";

/// A file to fetch from the repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub required: bool,
}

impl RemoteFile {
    fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true }
    }

    fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false }
    }
}

/// Everything a checkpoint pull fetches, given the parsed safetensors index
/// if the repo has one.
pub fn plan_files(index: Option<&serde_json::Value>) -> Vec<RemoteFile> {
    let mut files = vec![RemoteFile::required(CONFIG_FILE), RemoteFile::required(TOKENIZER_FILE)];
    files.extend(OPTIONAL_FILES.iter().map(|f| RemoteFile::optional(*f)));
    match index {
        Some(index) => {
            files.push(RemoteFile::required(SAFETENSORS_INDEX));
            files.extend(shard_files(index).into_iter().map(RemoteFile::required));
        }
        None => files.push(RemoteFile::required(SAFETENSORS_SINGLE)),
    }
    files
}

// ── Downloader ───────────────────────────────────────────────────────────────

/// Pulls safetensors checkpoints into a [`ModelCache`].
pub struct ModelDownloader {
    cache: ModelCache,
    api: Api,
    http: reqwest::Client,
    hf_token: Option<String>,
}

impl ModelDownloader {
    /// Reads `HUGGING_FACE_HUB_TOKEN` from the environment when set.
    pub fn new(cache: ModelCache) -> HubResult<Self> {
        let hf_token = std::env::var("HUGGING_FACE_HUB_TOKEN").ok().filter(|t| !t.is_empty());

        let api = ApiBuilder::new().with_token(hf_token.clone()).build()?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("psyllm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HubError::DownloadFailed { file: "<http client>".into(), reason: e.to_string() })?;

        Ok(Self { cache, api, http, hf_token })
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download config, tokenizer and safetensors weights for
    /// `repo_id@revision`. Files already cached are skipped.
    ///
    /// Missing optional files are logged and skipped; any required file that
    /// fails aborts the pull.
    pub async fn pull(&self, repo_id: &str, revision: &str, mp: Option<&MultiProgress>) -> HubResult<Vec<PathBuf>> {
        info!(repo_id, revision, "Pulling model");
        let repo = self.api.repo(Repo::with_revision(repo_id.to_string(), RepoType::Model, revision.to_string()));

        let fetched = self.download_file(&repo, repo_id, revision, SAFETENSORS_INDEX, None).await;
        let index = match index_if_present(fetched)? {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(HubError::Io)?;
                Some(serde_json::from_str::<serde_json::Value>(&raw)?)
            }
            None => None,
        };

        let plan = plan_files(index.as_ref());
        let mut local = Vec::with_capacity(plan.len());
        for file in &plan {
            match self.download_file(&repo, repo_id, revision, &file.name, mp).await {
                Ok(path) => local.push(path),
                Err(e) if !file.required => {
                    warn!(filename = %file.name, error = %e, "Optional file not available, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        info!(repo_id, revision, files = local.len(), "Model ready");
        Ok(local)
    }

    /// Stream one file to `<dest>.part`, rename into place, then record its
    /// digest in the sidecar.
    async fn download_file(
        &self,
        repo: &ApiRepo,
        repo_id: &str,
        revision: &str,
        filename: &str,
        mp: Option<&MultiProgress>,
    ) -> HubResult<PathBuf> {
        let dest = self.cache.file_path(repo_id, revision, filename);
        if self.cache.is_cached(repo_id, revision, filename) {
            debug!(filename, "Already cached");
            return Ok(dest);
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(HubError::Io)?;
        }

        let url = repo.url(filename);
        debug!(filename, %url, "Downloading");

        let mut req = self.http.get(&url);
        if let Some(token) = &self.hf_token {
            req = req.bearer_auth(token);
        }
        let response = req
            .send()
            .await
            .map_err(|e| HubError::DownloadFailed { file: filename.to_string(), reason: e.to_string() })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::NotFound { file: filename.to_string() });
        }
        if !status.is_success() {
            let hint = match status.as_u16() {
                401 | 403 => " (set HUGGING_FACE_HUB_TOKEN for gated repos)",
                _ => "",
            };
            return Err(HubError::DownloadFailed {
                file: filename.to_string(),
                reason: format!("HTTP {status}{hint}"),
            });
        }

        let pb = mp.map(|m| m.add(progress_bar(filename, response.content_length())));
        let partial = partial_path(&dest);
        if let Err(e) = stream_to_disk(response, &partial, pb.as_ref()).await {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, &dest).map_err(HubError::Io)?;

        let size_bytes = std::fs::metadata(&dest).map_err(HubError::Io)?.len();
        self.cache.write_meta(&FileMetadata {
            repo_id: repo_id.to_string(),
            revision: revision.to_string(),
            filename: filename.to_string(),
            sha256: sha256_file(&dest)?,
            size_bytes,
        })?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("Done  {filename}"));
        }
        info!(filename, size_bytes, "Downloaded");
        Ok(dest)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Only a missing index means a single-file checkpoint. Any other failure
/// (auth, server, network) is reported against the index itself.
fn index_if_present(fetched: HubResult<PathBuf>) -> HubResult<Option<PathBuf>> {
    match fetched {
        Ok(path) => Ok(Some(path)),
        Err(HubError::NotFound { file }) => {
            debug!(file, "No safetensors index, expecting a single weights file");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn stream_to_disk(response: reqwest::Response, path: &Path, pb: Option<&ProgressBar>) -> HubResult<()> {
    use std::io::Write;

    let mut file = std::io::BufWriter::new(std::fs::File::create(path).map_err(HubError::Io)?);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HubError::DownloadFailed {
            file: path.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?;
        file.write_all(&chunk).map_err(HubError::Io)?;
        if let Some(pb) = pb {
            pb.inc(chunk.len() as u64);
        }
    }
    file.flush().map_err(HubError::Io)?;
    Ok(())
}

fn progress_bar(filename: &str, total: Option<u64>) -> ProgressBar {
    let pb = match total {
        Some(total) => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(PB_TEMPLATE_SIZED)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");
            pb.set_style(style);
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template(PB_TEMPLATE_SPINNER).unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    };
    pb.set_message(filename.to_string());
    pb
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_os_string();
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[RemoteFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn single_file_plan() {
        let plan = plan_files(None);
        assert_eq!(
            names(&plan),
            vec![
                "config.json",
                "tokenizer.json",
                "tokenizer_config.json",
                "generation_config.json",
                "model.safetensors"
            ]
        );
        assert!(plan.iter().find(|f| f.name == "model.safetensors").unwrap().required);
        assert!(!plan.iter().find(|f| f.name == "generation_config.json").unwrap().required);
    }

    #[test]
    fn missing_index_means_single_file() {
        let fetched = Err(HubError::NotFound { file: SAFETENSORS_INDEX.to_string() });
        assert_eq!(index_if_present(fetched).unwrap(), None);

        let path = PathBuf::from("/cache/a__b/main/model.safetensors.index.json");
        assert_eq!(index_if_present(Ok(path.clone())).unwrap(), Some(path));
    }

    #[test]
    fn other_index_failures_propagate() {
        let fetched = Err(HubError::DownloadFailed {
            file: SAFETENSORS_INDEX.to_string(),
            reason: "HTTP 503 Service Unavailable".to_string(),
        });
        let err = index_if_present(fetched).unwrap_err();
        assert!(err.to_string().contains(SAFETENSORS_INDEX));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn sharded_plan_lists_each_shard_once() {
        let index = serde_json::json!({
            "weight_map": {
                "lm_head.weight": "model-00002-of-00002.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.norm.weight": "model-00002-of-00002.safetensors"
            }
        });
        let plan = plan_files(Some(&index));
        let shards: Vec<_> = plan.iter().filter(|f| f.name.starts_with("model-")).collect();
        assert_eq!(shards.len(), 2);
        assert!(shards.iter().all(|f| f.required));
        assert!(names(&plan).contains(&"model.safetensors.index.json"));
        assert!(!names(&plan).contains(&"model.safetensors"));
    }

    #[test]
    fn partial_path_appends_suffix() {
        let p = partial_path(Path::new("/cache/GMLHUHE__PsyLLM/main/model.safetensors"));
        assert_eq!(p, Path::new("/cache/GMLHUHE__PsyLLM/main/model.safetensors.part"));
    }

    #[test]
    fn downloader_builds_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(dir.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        assert_eq!(downloader.cache().root(), dir.path());
    }
}
