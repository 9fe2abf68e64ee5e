//! [`Extractor`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`. During a transfer, progress is
//! printed by `yt-dlp` as one JSON object per line (`--progress-template`
//! with [`PROGRESS_PREFIX`]) and forwarded as [`ProgressEvent`]s; other
//! stdout lines are scanned for the destination path.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, trace};

use super::{DownloadResult, Extractor, ExtractorError, FetchRequest, ProgressSender};
use crate::catalog::{AUDIO_ONLY_RESOLUTION, StreamDescriptor, VideoMetadata};
use crate::progress::ProgressEvent;

/// Program name used when no explicit path is configured.
pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Marker prefixed to every progress line requested from `yt-dlp`.
pub const PROGRESS_PREFIX: &str = "ytgrab-progress:";

/// Lines announcing where `yt-dlp` writes (or has written) the output.
#[allow(clippy::expect_used)]
static DESTINATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\[(?:download|ExtractAudio)\] Destination: (.+)$|^\[Merger\] Merging formats into "(.+)"$|^\[download\] (.+) has already been downloaded"#,
    )
    .expect("destination regex is valid") // Static pattern, safe to panic
});

/// `yt-dlp` driven through `tokio::process`.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    /// Uses the given executable (a bare name is looked up in `PATH`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ExtractorError {
        ExtractorError::ToolUnavailable {
            program: self.program_name(),
            source,
        }
    }

    fn io_error(&self, source: std::io::Error) -> ExtractorError {
        ExtractorError::Io {
            program: self.program_name(),
            source,
        }
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    #[instrument(skip(self), fields(program = %self.program.display()))]
    async fn resolve_formats(&self, url: &str) -> Result<VideoMetadata, ExtractorError> {
        info!("Fetching available formats");
        let output = self
            .command()
            .args(resolve_args(url))
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::resolution(
                url,
                summarize_stderr(&stderr, output.status),
            ));
        }

        let metadata = parse_metadata(url, &output.stdout)?;
        debug!(
            title = %metadata.title,
            streams = metadata.streams.len(),
            "Resolved formats"
        );
        Ok(metadata)
    }

    #[instrument(skip(self, request, progress), fields(selector = %request.selector))]
    async fn fetch_and_download(
        &self,
        url: &str,
        request: &FetchRequest,
        progress: ProgressSender,
    ) -> Result<DownloadResult, ExtractorError> {
        let args = download_args(url, request);
        debug!(?args, "Starting transfer");

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            self.io_error(std::io::Error::other("stdout was not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            self.io_error(std::io::Error::other("stderr was not captured"))
        })?;

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "yt-dlp stderr");
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let mut reported_path = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|source| self.io_error(source))?
        {
            if let Some(event) = parse_progress_line(&line) {
                if progress.send(event).is_err() {
                    trace!("Progress receiver dropped");
                }
                continue;
            }
            if let Some(path) = parse_destination_line(&line) {
                debug!(path = %path.display(), "Collaborator destination");
                reported_path = Some(path);
                continue;
            }
            trace!(line = %line, "yt-dlp stdout");
        }
        drop(progress);

        let status = child.wait().await.map_err(|source| self.io_error(source))?;
        let stderr = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            return Err(ExtractorError::transfer(url, summarize_stderr(&stderr, status)));
        }
        Ok(DownloadResult { reported_path })
    }
}

fn resolve_args(url: &str) -> Vec<String> {
    [
        "--dump-single-json",
        "--skip-download",
        "--no-playlist",
        "--no-warnings",
    ]
    .into_iter()
    .map(str::to_string)
    .chain([url.to_string()])
    .collect()
}

/// Builds the `yt-dlp` argument list for one transfer.
pub(crate) fn download_args(url: &str, request: &FetchRequest) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        request.selector.clone(),
        "-o".to_string(),
        request.output_template.to_string_lossy().into_owned(),
        "-N".to_string(),
        request.concurrent_fragments.max(1).to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        format!("download:{PROGRESS_PREFIX}%(progress)j"),
    ];

    if request.no_playlist {
        args.push("--no-playlist".to_string());
    }
    if request.overwrite {
        args.push("--force-overwrites".to_string());
    }
    if let Some(container) = &request.container_preference {
        args.push("--merge-output-format".to_string());
        args.push(container.clone());
    }
    if let Some(audio) = &request.audio_extraction {
        args.extend([
            "-x".to_string(),
            "--audio-format".to_string(),
            audio.codec.clone(),
            "--audio-quality".to_string(),
            format!("{}K", audio.quality.kbps()),
        ]);
    }

    args.push(url.to_string());
    args
}

fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let payload = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "Unparsable progress line");
            None
        }
    }
}

fn parse_destination_line(line: &str) -> Option<PathBuf> {
    let captures = DESTINATION_PATTERN.captures(line.trim_end())?;
    (1..=3)
        .find_map(|group| captures.get(group))
        .map(|m| PathBuf::from(m.as_str()))
}

/// Picks the most useful failure text: the `ERROR:` lines if present,
/// otherwise the last non-empty line, otherwise the exit status.
fn summarize_stderr(stderr: &str, status: ExitStatus) -> String {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("ERROR:"))
        .collect();
    if !errors.is_empty() {
        return errors.join("\n");
    }
    stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map_or_else(|| format!("yt-dlp exited with {status}"), str::to_string)
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    title: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    #[serde(default)]
    format_id: String,
    ext: Option<String>,
    resolution: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    fps: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

impl RawFormat {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_descriptor(self) -> StreamDescriptor {
        let has_video = self.vcodec.as_deref().is_some_and(|c| c != "none");
        let has_audio = self.acodec.as_deref().is_some_and(|c| c != "none");
        let resolution = if has_video {
            match (self.width, self.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 => format!("{w}x{h}"),
                _ => self.resolution.unwrap_or_else(|| "N/A".to_string()),
            }
        } else {
            AUDIO_ONLY_RESOLUTION.to_string()
        };
        let approximate_size_bytes = self
            .filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size.round() as u64);

        StreamDescriptor {
            id: self.format_id,
            container: self.ext.unwrap_or_else(|| "N/A".to_string()),
            resolution,
            frame_rate: self.fps,
            approximate_size_bytes,
            has_video,
            has_audio,
        }
    }
}

fn parse_metadata(url: &str, stdout: &[u8]) -> Result<VideoMetadata, ExtractorError> {
    let raw: RawVideo =
        serde_json::from_slice(stdout).map_err(|source| ExtractorError::InvalidMetadata {
            url: url.to_string(),
            source,
        })?;
    Ok(VideoMetadata {
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown Title".to_string()),
        duration_secs: raw.duration,
        view_count: raw.view_count,
        streams: raw
            .formats
            .into_iter()
            .filter(|f| !f.format_id.is_empty())
            .map(RawFormat::into_descriptor)
            .collect(),
    })
}
