//! Reading and writing stage files.
//!
//! Two on-disk shapes are in play: NDJSON, appended one record at a time by
//! the plan stage, and pretty-printed JSON arrays written whole by the later
//! stages. The loader accepts either.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SynthError, SynthResult};
use crate::records::PostId;
use crate::runner::Sink;

/// Sibling file used for in-progress checkpoints: `<path>.temp`.
pub fn checkpoint_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".temp");
    PathBuf::from(s)
}

/// Load records from a JSON array or from one object per line.
///
/// Array elements are decoded one at a time, so a single malformed record is
/// logged and dropped without losing its neighbours. Line mode is used only
/// when the file is not a valid array: blank lines and lone `[` / `]` are
/// skipped, trailing commas are ignored, and lines that fail to parse are
/// logged and dropped.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> SynthResult<Vec<T>> {
    let text = fs::read_to_string(path)?;
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(trimmed) {
            Ok(items) => return Ok(decode_elements(path, items)),
            Err(e) => debug!(path = %path.display(), error = %e, "Not a JSON array, reading line by line"),
        }
    }

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim().trim_end_matches(',');
        if line.is_empty() || line == "[" || line == "]" {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unparseable line"
            ),
        }
    }
    Ok(records)
}

fn decode_elements<T: DeserializeOwned>(path: &Path, items: Vec<Value>) -> Vec<T> {
    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), index, error = %e, "Skipping invalid record");
                None
            }
        })
        .collect();
    if records.len() < total {
        warn!(path = %path.display(), loaded = records.len(), total, "Some records were skipped");
    }
    records
}

/// Records previously written by an interrupted run.
///
/// The checkpoint file wins over `path` when both exist. Missing files yield
/// an empty list.
pub fn load_existing<T: DeserializeOwned>(path: &Path) -> SynthResult<Vec<T>> {
    let checkpoint = checkpoint_path(path);
    let source = if checkpoint.is_file() { checkpoint } else { path.to_path_buf() };
    if !source.is_file() {
        return Ok(Vec::new());
    }
    let records = load_records(&source)?;
    debug!(path = %source.display(), count = records.len(), "Loaded existing records");
    Ok(records)
}

/// Write `records` as a pretty JSON array via `<path>.temp` and rename.
///
/// Saving the final output therefore also consumes its checkpoint.
pub fn save_json_atomic<T: Serialize>(path: &Path, records: &[T]) -> SynthResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = checkpoint_path(path);
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut out, records)?;
        out.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), count = records.len(), "Saved records");
    Ok(())
}

/// `post_id` of every parseable line in an NDJSON file.
pub fn processed_ids(path: &Path) -> SynthResult<HashSet<PostId>> {
    #[derive(serde::Deserialize)]
    struct IdOnly {
        post_id: PostId,
    }

    let mut ids = HashSet::new();
    if !path.is_file() {
        return Ok(ids);
    }
    for line in BufReader::new(File::open(path)?).lines() {
        if let Ok(rec) = serde_json::from_str::<IdOnly>(line?.trim()) {
            ids.insert(rec.post_id);
        }
    }
    Ok(ids)
}

/// Append-only NDJSON writer; every record is flushed as soon as it is written.
pub struct NdjsonWriter {
    path: PathBuf,
    file: File,
}

impl NdjsonWriter {
    pub fn append(path: &Path) -> SynthResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> SynthResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(SynthError::Io)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize> Sink<T> for NdjsonWriter {
    fn accept(&mut self, item: T) -> SynthResult<()> {
        self.write(&item)
    }
}

/// Accumulates records in memory and checkpoints them as a JSON array.
#[derive(Debug)]
pub struct JsonArraySink<T> {
    records: Vec<T>,
    checkpoint: PathBuf,
}

impl<T: Serialize> JsonArraySink<T> {
    /// Start from `existing` records; checkpoints go to `<output>.temp`.
    pub fn new(existing: Vec<T>, output: &Path) -> Self {
        Self { records: existing, checkpoint: checkpoint_path(output) }
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

impl<T: Serialize> Sink<T> for JsonArraySink<T> {
    fn accept(&mut self, item: T) -> SynthResult<()> {
        self.records.push(item);
        Ok(())
    }

    fn checkpoint(&mut self) -> SynthResult<()> {
        save_json_atomic(&self.checkpoint, &self.records)
    }
}
