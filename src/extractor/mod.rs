//! Capability boundary to the extraction/download collaborator.
//!
//! Everything platform-specific (URL parsing, format discovery, network
//! transport, muxing, transcoding) lives behind [`Extractor`]. The rest of
//! the crate only sees [`VideoMetadata`], [`FetchRequest`], and a stream of
//! [`ProgressEvent`]s.

mod ytdlp;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::catalog::VideoMetadata;
use crate::progress::ProgressEvent;

pub use ytdlp::{DEFAULT_PROGRAM, PROGRESS_PREFIX, YtDlp};

/// Channel the collaborator pushes progress events into. Dropping the sender
/// ends the stream.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Errors reported by the collaborator.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The collaborator program could not be started.
    #[error("{program} could not be started: {source}")]
    ToolUnavailable {
        /// Program that was invoked.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL could not be resolved (network failure, private or
    /// unavailable video, malformed URL).
    #[error("{message}")]
    Resolution {
        /// The URL that failed.
        url: String,
        /// Collaborator message, verbatim.
        message: String,
    },

    /// The transfer or post-processing failed.
    #[error("{message}")]
    Transfer {
        /// The URL being downloaded.
        url: String,
        /// Collaborator message, verbatim.
        message: String,
    },

    /// The collaborator printed metadata that could not be parsed.
    #[error("unreadable metadata for {url}: {source}")]
    InvalidMetadata {
        /// The URL whose metadata was unreadable.
        url: String,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// IO failure while talking to a running collaborator process.
    #[error("IO error while running {program}: {source}")]
    Io {
        /// Program that was running.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractorError {
    /// Creates a resolution error.
    pub fn resolution(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a transfer error.
    pub fn transfer(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Bitrate for mp3 audio extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioQuality {
    #[default]
    #[serde(rename = "192")]
    Kbps192,
    #[serde(rename = "256")]
    Kbps256,
    #[serde(rename = "320")]
    Kbps320,
}

impl AudioQuality {
    /// All supported bitrates.
    pub const ALL: [Self; 3] = [Self::Kbps192, Self::Kbps256, Self::Kbps320];

    #[must_use]
    pub fn kbps(self) -> u16 {
        match self {
            Self::Kbps192 => 192,
            Self::Kbps256 => 256,
            Self::Kbps320 => 320,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kbps())
    }
}

impl FromStr for AudioQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['k', 'K']);
        Self::ALL
            .into_iter()
            .find(|q| q.kbps().to_string() == trimmed)
            .ok_or_else(|| format!("unsupported audio quality '{s}': expected 192, 256 or 320"))
    }
}

/// Post-process step converting the transfer into an audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioExtraction {
    /// Target codec (always `mp3` today).
    pub codec: String,
    /// Target bitrate.
    pub quality: AudioQuality,
}

impl AudioExtraction {
    /// mp3 extraction at the given bitrate.
    #[must_use]
    pub fn mp3(quality: AudioQuality) -> Self {
        Self {
            codec: "mp3".to_string(),
            quality,
        }
    }
}

/// Everything the collaborator needs to perform one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Stream id or selector expression.
    pub selector: String,
    /// Output path template; `%(ext)s` is filled in by the collaborator.
    pub output_template: PathBuf,
    /// Preferred container when streams are merged.
    pub container_preference: Option<String>,
    /// Number of fragments fetched concurrently.
    pub concurrent_fragments: u8,
    /// Whether existing files may be replaced.
    pub overwrite: bool,
    /// Never expand a URL into a playlist.
    pub no_playlist: bool,
    /// Optional audio extraction post-process.
    pub audio_extraction: Option<AudioExtraction>,
}

/// What the collaborator reports after a successful transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Final path the collaborator announced, if it announced one.
    pub reported_path: Option<PathBuf>,
}

/// The extraction/download collaborator.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name of the collaborator (for logging).
    fn name(&self) -> &'static str;

    /// Resolves a URL into its title and raw stream descriptors.
    async fn resolve_formats(&self, url: &str) -> Result<VideoMetadata, ExtractorError>;

    /// Performs the transfer, pushing progress events into `progress` in
    /// order: every `downloading` event before at most one `finished` event.
    async fn fetch_and_download(
        &self,
        url: &str,
        request: &FetchRequest,
        progress: ProgressSender,
    ) -> Result<DownloadResult, ExtractorError>;
}
