//! Bounded-concurrency work loop shared by the pipeline stages.
//!
//! Items are processed in batches. Within a batch up to `max_workers`
//! requests are in flight; each item is retried with a fixed delay and, once
//! it runs out of attempts, counted as failed and skipped. A failing item
//! never aborts the run. Only sink errors (disk writes) do.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::SynthResult;
use crate::settings::SynthSettings;

/// Receives finished items.
pub trait Sink<T> {
    fn accept(&mut self, item: T) -> SynthResult<()>;

    /// Persist progress. Called after every batch and, if enabled, every
    /// `save_every` successes.
    fn checkpoint(&mut self) -> SynthResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunStats {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone)]
pub struct Runner {
    max_workers: usize,
    max_retries: u32,
    retry_delay: Duration,
    batch_size: usize,
    save_every: Option<usize>,
    show_progress: bool,
}

impl Runner {
    pub fn from_settings(settings: &SynthSettings) -> Self {
        Self {
            max_workers: settings.max_workers.max(1),
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay(),
            batch_size: settings.batch_size.max(1),
            save_every: None,
            show_progress: true,
        }
    }

    pub fn with_save_every(mut self, n: usize) -> Self {
        self.save_every = (n > 0).then_some(n);
        self
    }

    /// Disable the terminal progress bar.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Run `work` over every item and feed successes to `sink`.
    pub async fn run<I, T, F, Fut, S>(&self, label: &str, items: Vec<I>, work: F, sink: &mut S) -> SynthResult<RunStats>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = SynthResult<T>>,
        S: Sink<T>,
    {
        let total = items.len();
        let pb = self.progress_bar(total as u64, label);
        let started = Instant::now();
        let mut stats = RunStats::default();
        let work = &work;

        let mut pending = items.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<I> = pending.by_ref().take(self.batch_size).collect();
            let mut results = stream::iter(batch)
                .map(|item| with_retries(self.max_retries, self.retry_delay, move || work(item.clone())))
                .buffer_unordered(self.max_workers);

            while let Some(result) = results.next().await {
                match result {
                    Ok(out) => {
                        sink.accept(out)?;
                        stats.succeeded += 1;
                        if self.save_every.is_some_and(|n| stats.succeeded % n == 0) {
                            sink.checkpoint()?;
                        }
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!(stage = label, error = %e, "Item failed, skipping");
                    }
                }
                pb.inc(1);
                pb.set_message(format!("Success: {}, Fail: {}", stats.succeeded, stats.failed));
            }

            sink.checkpoint()?;
            info!(stage = label, done = stats.total(), total, "Batch saved");
        }

        pb.finish_and_clear();
        info!(
            stage = label,
            succeeded = stats.succeeded,
            failed = stats.failed,
            elapsed = %format_duration(started.elapsed().as_secs()),
            "Stage finished"
        );
        Ok(stats)
    }

    fn progress_bar(&self, total: u64, label: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {prefix} {bar:40.cyan/blue} {pos}/{len} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
        pb.set_style(style);
        pb.set_prefix(label.to_string());
        pb.set_message("Success: 0, Fail: 0");
        pb
    }
}

/// Call `op` until it succeeds, at most `max_retries + 1` times, sleeping
/// `delay` between attempts. The last error is returned.
pub async fn with_retries<T, F, Fut>(max_retries: u32, delay: Duration, mut op: F) -> SynthResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SynthResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                warn!(attempt, max_retries, error = %e, "Request failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
