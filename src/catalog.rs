//! Date-grouped view of the videos currently sitting in the download
//! directory.
//!
//! Nothing here is cached: every call walks the directory again, so the
//! catalog can never drift from what is actually on disk.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Extensions (lowercase, without the dot) that count as downloaded videos.
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "avi", "webm"];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Which filesystem timestamp drives date grouping and ordering.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    /// Last-modified time. Behaves the same on every platform.
    #[default]
    Modified,
    /// Creation time when the platform records one, otherwise the Unix
    /// status-change time, otherwise the last-modified time.
    Created,
}

impl TimestampPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "modified" | "mtime" => Some(Self::Modified),
            "created" | "ctime" | "birth" => Some(Self::Created),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Created => "created",
        }
    }

    fn timestamp(self, metadata: &fs::Metadata) -> io::Result<SystemTime> {
        match self {
            Self::Modified => metadata.modified(),
            Self::Created => metadata
                .created()
                .or_else(|_| status_change_time(metadata)),
        }
    }
}

#[cfg(unix)]
fn status_change_time(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    use std::time::{Duration, UNIX_EPOCH};

    match u64::try_from(metadata.ctime()) {
        Ok(secs) => {
            let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
            Ok(UNIX_EPOCH + Duration::new(secs, nanos))
        }
        // Pre-epoch status changes only show up on badly skewed clocks.
        Err(_) => metadata.modified(),
    }
}

#[cfg(not(unix))]
fn status_change_time(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    metadata.modified()
}

/// One video file found in the download directory.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoFileEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    /// Local calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub timestamp: DateTime<Local>,
}

impl VideoFileEntry {
    /// Size in megabytes with two decimals, e.g. `12.34`.
    pub fn size_mb(&self) -> String {
        format_size_mb(self.size_bytes)
    }
}

/// All entries sharing a calendar day, newest first.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DateGroup {
    pub date: String,
    pub entries: Vec<VideoFileEntry>,
}

/// Catalog of downloaded videos, newest day first.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Catalog {
    pub groups: Vec<DateGroup>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of files across every day.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.entries.len()).sum()
    }

    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|group| group.date.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &VideoFileEntry> {
        self.groups.iter().flat_map(|group| group.entries.iter())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries().any(|entry| entry.filename == filename)
    }

    fn from_entries(entries: Vec<VideoFileEntry>) -> Self {
        let mut by_date: BTreeMap<String, Vec<VideoFileEntry>> = BTreeMap::new();
        for entry in entries {
            by_date.entry(entry.date.clone()).or_default().push(entry);
        }

        let groups = by_date
            .into_iter()
            .rev()
            .map(|(date, mut entries)| {
                entries.sort_by(|a, b| {
                    b.timestamp
                        .cmp(&a.timestamp)
                        .then_with(|| a.filename.cmp(&b.filename))
                });
                DateGroup { date, entries }
            })
            .collect();

        Self { groups }
    }
}

/// Returns true when the path carries one of the [`VIDEO_EXTENSIONS`],
/// compared case-insensitively.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn format_size_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}

/// Formats a timestamp as the `YYYY-MM-DD` key used to group entries.
pub fn date_key(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

/// Scans `dir` (non-recursively) and builds the catalog.
///
/// Non-video files and subdirectories are skipped. Files that disappear or
/// become unreadable mid-scan are skipped with a warning; failing to read the
/// directory itself is an error.
pub fn scan_catalog(dir: &Path, policy: TimestampPolicy) -> Result<Catalog> {
    let mut entries = Vec::new();

    for item in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let item = match item {
            Ok(item) => item,
            Err(err) if err.depth() == 0 => {
                return Err(err).with_context(|| format!("reading {}", dir.display()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable catalog entry");
                continue;
            }
        };

        if !item.file_type().is_file() || !is_video_file(item.path()) {
            continue;
        }

        match read_entry(item.path(), policy) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(path = %item.path().display(), error = %err, "skipping video");
            }
        }
    }

    Ok(Catalog::from_entries(entries))
}

fn read_entry(path: &Path, policy: TimestampPolicy) -> io::Result<VideoFileEntry> {
    let metadata = fs::metadata(path)?;
    let timestamp = DateTime::<Local>::from(policy.timestamp(&metadata)?);
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(VideoFileEntry {
        filename,
        size_bytes: metadata.len(),
        path: path.to_path_buf(),
        date: date_key(&timestamp),
        timestamp,
    })
}
