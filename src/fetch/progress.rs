// src/fetch/progress.rs

//! Download progress display
//!
//! Wraps indicatif's `MultiProgress` so concurrent artifact downloads each
//! get a bar, with an optional aggregate bar over the whole plan.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Multi-bar manager shared by the downloads of one plan
#[derive(Clone)]
pub struct DownloadProgress {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            overall: None,
        }
    }

    /// Add an aggregate bar counting finished artifacts
    pub fn with_aggregate(artifact_count: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = ProgressBar::new(artifact_count as u64);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("Total: [{bar:40.green/dim}] {pos}/{len} artifacts - {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        let overall = multi.add(overall);
        Self {
            multi,
            overall: Some(overall),
        }
    }

    /// Bar for a download of known size
    pub fn add_download(&self, name: &str, size: u64) -> ProgressBar {
        let pb = ProgressBar::new(size);
        pb.set_style(bar_style());
        pb.set_message(name.to_string());
        self.multi.add(pb)
    }

    /// Spinner for a download of unknown size
    pub fn add_spinner(&self, name: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_message(name.to_string());
        self.multi.add(pb)
    }

    /// Bar sized from an optional length
    pub fn add(&self, name: &str, size: Option<u64>) -> ProgressBar {
        match size {
            Some(size) if size > 0 => self.add_download(name, size),
            _ => self.add_spinner(name),
        }
    }

    pub fn finish_download(&self, pb: &ProgressBar, name: &str) {
        pb.finish_with_message(format!("{name} [done]"));
        if let Some(overall) = &self.overall {
            overall.inc(1);
        }
    }

    pub fn fail_download(&self, pb: &ProgressBar, name: &str, error: &str) {
        pb.abandon_with_message(format!("{name} [FAILED: {error}]"));
    }

    /// Close the aggregate bar with a summary
    pub fn finish_all(&self, succeeded: usize, failed: usize, total_bytes: u64) {
        if let Some(overall) = &self.overall {
            let mb = total_bytes as f64 / 1_048_576.0;
            if failed > 0 {
                overall.finish_with_message(format!(
                    "{succeeded} succeeded, {failed} failed ({mb:.2} MB)"
                ));
            } else {
                overall.finish_with_message(format!("{succeeded} artifacts ({mb:.2} MB)"));
            }
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
