//! Client for the external extraction/download tool.
//!
//! The orchestrator only talks to the [`Extractor`] trait; [`YtDlp`] is the
//! production implementation and shells out to `yt-dlp`, reading the info
//! JSON it prints once the download (and any merge) has finished.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output naming template: `{video_title}.{extension}` in yt-dlp syntax.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Best mp4 video + m4a audio, else best single mp4, else whatever is best.
pub const FORMAT_POLICY: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Where and how a single URL should be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub output_dir: PathBuf,
    pub output_template: String,
    pub format_policy: String,
}

impl FetchRequest {
    /// Request rooted at `output_dir` using the fixed template and format
    /// policy.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_template: OUTPUT_TEMPLATE.to_string(),
            format_policy: FORMAT_POLICY.to_string(),
        }
    }

    pub fn output_path_template(&self) -> PathBuf {
        self.output_dir.join(&self.output_template)
    }
}

/// Metadata reported back after a successful download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchedMedia {
    pub title: Option<String>,
    pub extension: Option<String>,
    pub final_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{message}")]
    Failed { status: String, message: String },
    #[error("unreadable extractor output: {0}")]
    InvalidOutput(String),
}

/// Anything able to turn a URL into a file inside the requested directory.
pub trait Extractor: Send + Sync {
    fn fetch(&self, url: &str, request: &FetchRequest) -> Result<FetchedMedia, ExtractError>;
}

/// `yt-dlp` subprocess client.
///
/// The command can carry leading arguments (for instance
/// `python3 -m yt_dlp`), which are passed before the per-download flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlp {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Splits a whitespace-separated command line such as
    /// `python3 -m yt_dlp`. Blank input falls back to plain `yt-dlp`.
    pub fn from_command_line(command: &str) -> Self {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Self::default();
        };
        parts.fold(Self::new(program), |client, arg| client.arg(arg))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        command
    }

    fn download_args(url: &str, request: &FetchRequest) -> Vec<OsString> {
        vec![
            "--no-progress".into(),
            "--no-warnings".into(),
            "--no-simulate".into(),
            "--dump-single-json".into(),
            "--format".into(),
            request.format_policy.clone().into(),
            "--output".into(),
            request.output_path_template().into_os_string(),
            // Keeps URLs that start with a dash from being read as flags.
            "--".into(),
            url.into(),
        ]
    }

    /// Runs `--version` so a missing installation shows up at startup rather
    /// than on the first submission.
    pub fn ensure_available(&self) -> Result<()> {
        let status = self
            .command()
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => bail!(
                "{} is installed but returned a failure status",
                self.program.display()
            ),
            Err(err) => bail!(
                "{} is not installed or not in PATH: {}",
                self.program.display(),
                err
            ),
        }
    }
}

impl Extractor for YtDlp {
    fn fetch(&self, url: &str, request: &FetchRequest) -> Result<FetchedMedia, ExtractError> {
        let output = self
            .command()
            .args(Self::download_args(url, request))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExtractError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_non_empty_line(&stderr)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(ExtractError::Failed {
                status: output.status.to_string(),
                message,
            });
        }

        parse_info(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Subset of the `--dump-single-json` payload needed after a download.
#[derive(Deserialize)]
struct DownloadInfo {
    title: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(rename = "_filename")]
    internal_filename: Option<String>,
    filename: Option<String>,
}

#[derive(Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
    ext: Option<String>,
}

fn parse_info(stdout: &str) -> Result<FetchedMedia, ExtractError> {
    let line = last_non_empty_line(stdout)
        .ok_or_else(|| ExtractError::InvalidOutput("no metadata printed".to_string()))?;
    let info: DownloadInfo =
        serde_json::from_str(line).map_err(|err| ExtractError::InvalidOutput(err.to_string()))?;

    let requested = info.requested_downloads.first();
    let final_path = requested
        .and_then(|download| download.filepath.clone())
        .or(info.internal_filename)
        .or(info.filename)
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from);
    let extension = requested
        .and_then(|download| download.ext.clone())
        .or(info.ext);

    Ok(FetchedMedia {
        title: info.title,
        extension,
        final_path,
    })
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|line| !line.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// POSIX shell stand-in for yt-dlp. URLs containing `fail` exit non-zero,
    /// URLs containing `untitled` omit the title, anything else writes a small
    /// mp4 named after the URL's last segment. Every call is appended to
    /// `calls.log` beside the output directory.
    pub(crate) const YT_DLP_STUB: &str = r#"#!/bin/sh
output=""
format=""
url=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) shift; output="$1" ;;
    --format) shift; format="$1" ;;
    --version) echo "2024.01.01"; exit 0 ;;
    --) shift; url="$1"; break ;;
  esac
  shift
done
dir=$(dirname "$output")
echo "$url|$format|$output" >> "$(dirname "$dir")/calls.log"
case "$url" in
  *fail*)
    echo "WARNING: retrying" >&2
    echo "ERROR: Unsupported URL: $url" >&2
    exit 1
    ;;
esac
name=$(basename "$url")
path="$dir/Clip $name.mp4"
printf 'video-bytes' > "$path"
case "$url" in
  *untitled*)
    printf '{"ext": "mp4", "_filename": "%s"}\n' "$path"
    ;;
  *)
    echo "[download] Destination: $path"
    printf '{"title": "Clip %s", "ext": "mp4", "requested_downloads": [{"filepath": "%s", "ext": "mp4"}]}\n' "$name" "$path"
    ;;
esac
"#;

    /// Writes the stub into `root` and returns a client that runs it via
    /// `sh`, so the script never needs the executable bit.
    pub(crate) fn install_stub(root: &Path) -> YtDlp {
        let script = root.join("yt-dlp-stub.sh");
        fs::write(&script, YT_DLP_STUB).unwrap();
        YtDlp::new("sh").arg(script)
    }

    #[test]
    fn fetch_request_uses_fixed_template_and_policy() {
        let request = FetchRequest::new("/downloads");
        assert_eq!(
            request.output_path_template(),
            PathBuf::from("/downloads/%(title)s.%(ext)s")
        );
        assert_eq!(
            request.format_policy,
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
        );
    }

    #[test]
    fn from_command_line_splits_leading_args() {
        let client = YtDlp::from_command_line("python3 -m yt_dlp");
        assert_eq!(client.program(), Path::new("python3"));
        assert_eq!(client.leading_args, vec![OsString::from("-m"), "yt_dlp".into()]);
        assert_eq!(YtDlp::from_command_line("   "), YtDlp::default());
    }

    #[test]
    fn download_args_end_with_url_after_separator() {
        let args = YtDlp::download_args("-weird", &FetchRequest::new("/d"));
        let tail: Vec<_> = args.iter().rev().take(2).collect();
        assert_eq!(tail, vec![&OsString::from("-weird"), &OsString::from("--")]);
        assert!(args.contains(&OsString::from("--no-simulate")));
    }

    #[test]
    fn parse_info_prefers_requested_download_path() {
        let media = parse_info(
            r#"{"title":"Alpha","ext":"webm","_filename":"/d/Alpha.webm","requested_downloads":[{"filepath":"/d/Alpha.mp4","ext":"mp4"}]}"#,
        )
        .unwrap();
        assert_eq!(media.title.as_deref(), Some("Alpha"));
        assert_eq!(media.extension.as_deref(), Some("mp4"));
        assert_eq!(media.final_path, Some(PathBuf::from("/d/Alpha.mp4")));
    }

    #[test]
    fn parse_info_falls_back_to_filename_fields() {
        let media = parse_info("noise\n{\"ext\":\"mkv\",\"filename\":\"/d/x.mkv\"}\n\n").unwrap();
        assert_eq!(media.title, None);
        assert_eq!(media.extension.as_deref(), Some("mkv"));
        assert_eq!(media.final_path, Some(PathBuf::from("/d/x.mkv")));
    }

    #[test]
    fn parse_info_rejects_garbage() {
        assert!(matches!(parse_info(""), Err(ExtractError::InvalidOutput(_))));
        assert!(matches!(
            parse_info("not json"),
            Err(ExtractError::InvalidOutput(_))
        ));
    }

    #[test]
    fn yt_dlp_fetch_downloads_through_stub() {
        let temp = tempdir().unwrap();
        let downloads = temp.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        let client = install_stub(temp.path());

        let media = client
            .fetch("https://example.test/alpha", &FetchRequest::new(&downloads))
            .unwrap();
        assert_eq!(media.title.as_deref(), Some("Clip alpha"));
        assert_eq!(media.final_path, Some(downloads.join("Clip alpha.mp4")));
        assert!(downloads.join("Clip alpha.mp4").exists());

        let calls = fs::read_to_string(temp.path().join("calls.log")).unwrap();
        let expected_output = downloads.join(OUTPUT_TEMPLATE);
        assert_eq!(
            calls.trim(),
            format!(
                "https://example.test/alpha|{FORMAT_POLICY}|{}",
                expected_output.display()
            )
        );
    }

    #[test]
    fn yt_dlp_fetch_reports_last_stderr_line() {
        let temp = tempdir().unwrap();
        let downloads = temp.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        let client = install_stub(temp.path());

        let err = client
            .fetch("https://example.test/fail", &FetchRequest::new(&downloads))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Failed { .. }));
        assert_eq!(
            err.to_string(),
            "ERROR: Unsupported URL: https://example.test/fail"
        );
    }

    #[test]
    fn yt_dlp_fetch_reports_missing_program() {
        let client = YtDlp::new("/nonexistent/yt-dlp");
        let err = client
            .fetch("https://example.test/alpha", &FetchRequest::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Launch { .. }));
        assert!(client.ensure_available().is_err());
    }

    #[test]
    fn ensure_available_accepts_working_stub() {
        let temp = tempdir().unwrap();
        assert!(install_stub(temp.path()).ensure_available().is_ok());
    }
}
