use std::ffi::OsString;
use std::path::{Path, PathBuf};

use psyllm_core::qwen3::shard_files;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HubError, HubResult};
use crate::integrity::verify_integrity;

pub(crate) const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub(crate) const SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
pub(crate) const SAFETENSORS_SINGLE: &str = "model.safetensors";

const META_SUFFIX: &str = ".meta.json";
pub(crate) const PARTIAL_SUFFIX: &str = ".part";

/// Sidecar written next to every downloaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub repo_id: String,
    pub revision: String,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// One `(repo, revision)` entry in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedModel {
    pub repo_id: String,
    pub revision: String,
    pub file_count: usize,
    pub size_bytes: u64,
}

/// On-disk checkpoint cache.
///
/// Layout: `<root>/<owner>__<repo>/<revision>/<filename>`, with a
/// `<filename>.meta.json` sidecar per file. Downloads in flight live at
/// `<filename>.part` and are ignored by every query here.
#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
}

impl ModelCache {
    /// Open (and create if needed) a cache rooted at `root`. A leading `~` is
    /// expanded to the home directory.
    pub fn new(root: impl Into<PathBuf>) -> HubResult<Self> {
        let root = expand_tilde(&root.into());
        std::fs::create_dir_all(&root).map_err(HubError::Io)?;
        Ok(Self { root })
    }

    /// `~/.cache/psyllm`.
    pub fn default_cache() -> HubResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| HubError::InvalidCacheDir("Cannot determine home directory".to_string()))?;
        Self::new(home.join(".cache").join("psyllm"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of `(repo_id, revision)`. This is the
    /// `model_dir` handed to the model loader.
    pub fn model_dir(&self, repo_id: &str, revision: &str) -> PathBuf {
        self.root.join(repo_slug(repo_id)).join(revision)
    }

    pub fn file_path(&self, repo_id: &str, revision: &str, filename: &str) -> PathBuf {
        self.model_dir(repo_id, revision).join(filename)
    }

    pub fn meta_path(&self, repo_id: &str, revision: &str, filename: &str) -> PathBuf {
        with_suffix(self.file_path(repo_id, revision, filename), META_SUFFIX)
    }

    /// Both the file and its sidecar are present.
    pub fn is_cached(&self, repo_id: &str, revision: &str, filename: &str) -> bool {
        self.file_path(repo_id, revision, filename).is_file()
            && self.meta_path(repo_id, revision, filename).is_file()
    }

    pub fn write_meta(&self, meta: &FileMetadata) -> HubResult<()> {
        let path = self.meta_path(&meta.repo_id, &meta.revision, &meta.filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(HubError::Io)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(meta)?).map_err(HubError::Io)?;
        debug!(path = %path.display(), "Wrote file metadata");
        Ok(())
    }

    pub fn read_meta(&self, repo_id: &str, revision: &str, filename: &str) -> HubResult<FileMetadata> {
        let path = self.meta_path(repo_id, revision, filename);
        let json = std::fs::read_to_string(&path).map_err(HubError::Io)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Safetensors weights are complete: every shard named by the index, or
    /// the single `model.safetensors`.
    pub fn has_weights(&self, repo_id: &str, revision: &str) -> bool {
        let dir = self.model_dir(repo_id, revision);
        let index_path = dir.join(SAFETENSORS_INDEX);
        if index_path.is_file() {
            let shards = std::fs::read_to_string(&index_path)
                .ok()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
                .map(|index| shard_files(&index))
                .unwrap_or_default();
            return !shards.is_empty() && shards.iter().all(|s| dir.join(s).is_file());
        }
        dir.join(SAFETENSORS_SINGLE).is_file()
    }

    /// Weights plus the config and tokenizer the loader reads.
    pub fn is_loadable(&self, repo_id: &str, revision: &str) -> bool {
        let dir = self.model_dir(repo_id, revision);
        self.has_weights(repo_id, revision)
            && dir.join(CONFIG_FILE).is_file()
            && dir.join(TOKENIZER_FILE).is_file()
    }

    /// Every cached `(repo, revision)`, sorted by repo then revision.
    pub fn list_models(&self) -> HubResult<Vec<CachedModel>> {
        let mut models = Vec::new();
        for repo_entry in read_dirs(&self.root)? {
            let repo_id = repo_id_from_slug(&repo_entry.file_name().to_string_lossy());
            for rev_entry in read_dirs(&repo_entry.path())? {
                let (file_count, size_bytes) = data_files(&rev_entry.path())
                    .iter()
                    .fold((0, 0), |(n, bytes), p| {
                        (n + 1, bytes + std::fs::metadata(p).map(|m| m.len()).unwrap_or(0))
                    });
                models.push(CachedModel {
                    repo_id: repo_id.clone(),
                    revision: rev_entry.file_name().to_string_lossy().to_string(),
                    file_count,
                    size_bytes,
                });
            }
        }
        models.sort_by(|a, b| (&a.repo_id, &a.revision).cmp(&(&b.repo_id, &b.revision)));
        Ok(models)
    }

    /// Remove one revision, or all revisions when `revision` is `None`.
    /// Returns the number of data files deleted.
    pub fn delete_model(&self, repo_id: &str, revision: Option<&str>) -> HubResult<usize> {
        let repo_root = self.root.join(repo_slug(repo_id));
        if !repo_root.is_dir() {
            return Err(HubError::NotCached(repo_id.to_string()));
        }

        let targets: Vec<PathBuf> = match revision {
            Some(rev) => {
                let dir = repo_root.join(rev);
                if !dir.is_dir() {
                    return Err(HubError::NotCached(format!("{repo_id}@{rev}")));
                }
                vec![dir]
            }
            None => read_dirs(&repo_root)?.into_iter().map(|e| e.path()).collect(),
        };

        let mut removed = 0;
        for dir in &targets {
            removed += data_files(dir).len();
            std::fs::remove_dir_all(dir).map_err(HubError::Io)?;
        }

        let repo_now_empty = std::fs::read_dir(&repo_root)
            .map(|mut d| d.next().is_none())
            .unwrap_or(false);
        if repo_now_empty {
            std::fs::remove_dir(&repo_root).map_err(HubError::Io)?;
        }

        info!(repo_id, ?revision, removed, "Deleted cached model");
        Ok(removed)
    }

    /// Re-hash every file that has a sidecar and compare against the
    /// recorded digest. Returns the number of files checked.
    pub fn verify_model(&self, repo_id: &str, revision: &str) -> HubResult<usize> {
        let dir = self.model_dir(repo_id, revision);
        if !dir.is_dir() {
            return Err(HubError::NotCached(format!("{repo_id}@{revision}")));
        }
        let mut checked = 0;
        for path in data_files(&dir) {
            let Some(filename) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if !self.meta_path(repo_id, revision, &filename).is_file() {
                continue;
            }
            let meta = self.read_meta(repo_id, revision, &filename)?;
            verify_integrity(&path, &meta.sha256)?;
            checked += 1;
        }
        Ok(checked)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

fn repo_slug(repo_id: &str) -> String {
    repo_id.replace('/', "__")
}

fn repo_id_from_slug(slug: &str) -> String {
    slug.replacen("__", "/", 1)
}

fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut s: OsString = path.into_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn read_dirs(dir: &Path) -> HubResult<Vec<std::fs::DirEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(HubError::Io)? {
        let entry = entry.map_err(HubError::Io)?;
        if entry.path().is_dir() {
            out.push(entry);
        }
    }
    Ok(out)
}

/// Downloaded files under `dir`, recursively, excluding sidecars and partials.
fn data_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).into_iter().flatten().flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(data_files(&path));
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(META_SUFFIX) && !name.ends_with(PARTIAL_SUFFIX) {
            files.push(path);
        }
    }
    files
}
