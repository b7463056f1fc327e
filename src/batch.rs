//! Batch download orchestration.
//!
//! A submission is a list of raw URL strings. They are normalized (trimmed,
//! blanks dropped, exact duplicates collapsed), then handed one at a time to
//! the [`Extractor`]. Every URL produces exactly one [`DownloadOutcome`]; a
//! failing URL never stops the rest of the batch.

use std::{path::Path, sync::Arc};

use serde::Serialize;

use crate::extractor::{Extractor, FetchRequest, FetchedMedia};

pub const NO_VALID_URLS: &str = "No valid URLs provided.";

/// Result of one URL in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Success { url: String, title: String },
    Failure { url: String, error: String },
}

impl DownloadOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Ordered outcomes of one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<DownloadOutcome>,
}

impl BatchResult {
    pub fn successes(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DownloadOutcome::Success { title, .. } => Some(title.as_str()),
            DownloadOutcome::Failure { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DownloadOutcome::Failure { url, error } => Some((url.as_str(), error.as_str())),
            DownloadOutcome::Success { .. } => None,
        })
    }

    /// Human-readable summary shown after a submission.
    pub fn status_message(&self) -> String {
        let titles: Vec<&str> = self.successes().collect();
        let failures: Vec<(&str, &str)> = self.failures().collect();

        let mut message = match (titles.len(), failures.len()) {
            (0, 0) => return NO_VALID_URLS.to_string(),
            (1, 0) => return format!("Video \"{}\" downloaded successfully!", titles[0]),
            (count, 0) => {
                let mut message = format!("Successfully downloaded {count} videos:");
                for title in &titles {
                    message.push_str(&format!("\n- {title}"));
                }
                return message;
            }
            (0, failed) => format!("Failed to download {failed} video(s). Check URLs."),
            (done, failed) => format!(
                "Downloaded {done} {}. Failed: {failed} {}.",
                video_noun(done),
                video_noun(failed)
            ),
        };

        for (url, error) in failures {
            message.push_str(&format!("\n- {url}: {error}"));
        }
        message
    }
}

fn video_noun(count: usize) -> &'static str {
    if count == 1 { "video" } else { "videos" }
}

/// Trims every entry, drops blanks and keeps the first occurrence of each
/// exact duplicate.
pub fn normalize_urls<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut urls: Vec<String> = Vec::new();
    for candidate in raw {
        let trimmed = candidate.as_ref().trim();
        if trimmed.is_empty() || urls.iter().any(|url| url == trimmed) {
            continue;
        }
        urls.push(trimmed.to_string());
    }
    urls
}

/// Collects the URL lines of a form submission: the single `url` field
/// first, then every line of the multi-line `urls` field.
pub fn submission_lines(single: Option<&str>, multi: Option<&str>) -> Vec<String> {
    single
        .into_iter()
        .chain(multi.into_iter().flat_map(str::lines))
        .map(str::to_owned)
        .collect()
}

/// Runs batches against a fixed download directory.
#[derive(Clone)]
pub struct BatchDownloader {
    extractor: Arc<dyn Extractor>,
    request: FetchRequest,
}

impl BatchDownloader {
    pub fn new(extractor: Arc<dyn Extractor>, download_dir: &Path) -> Self {
        Self {
            extractor,
            request: FetchRequest::new(download_dir),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.request.output_dir
    }

    /// Normalizes `raw` and downloads every remaining URL.
    pub fn run<I, S>(&self, raw: I) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.download_all(&normalize_urls(raw), |_| {})
    }

    /// Downloads already-normalized `urls` in order, calling `on_outcome`
    /// as soon as each one finishes.
    pub fn download_all(
        &self,
        urls: &[String],
        mut on_outcome: impl FnMut(&DownloadOutcome),
    ) -> BatchResult {
        let mut outcomes = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            tracing::info!(url = %url, position = index + 1, total = urls.len(), "downloading");
            let outcome = self.download_one(url);
            on_outcome(&outcome);
            outcomes.push(outcome);
        }
        BatchResult { outcomes }
    }

    fn download_one(&self, url: &str) -> DownloadOutcome {
        match self.extractor.fetch(url, &self.request) {
            Ok(media) => {
                let title = resolved_title(url, &media);
                tracing::info!(url = %url, title = %title, "download finished");
                DownloadOutcome::Success {
                    url: url.to_string(),
                    title,
                }
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "download failed");
                DownloadOutcome::Failure {
                    url: url.to_string(),
                    error: err.to_string(),
                }
            }
        }
    }
}

/// Reported title, else the written file's name, else the URL itself.
fn resolved_title(url: &str, media: &FetchedMedia) -> String {
    media
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            media
                .final_path
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| url.to_string())
}
