//! Download job shared by the command-line and interactive surfaces.
//!
//! A job is: resolve the catalog, pick a selector, let the collision engine
//! decide about the destination, then [`execute`] the decision. Both surfaces
//! drive the same functions so their behaviour cannot drift apart.
//!
//! # Example
//!
//! ```no_run
//! use ytgrab_core::{
//!     CollisionDecision, DownloadPlan, FormatSelector, TransferOptions, YtDlp, execute,
//!     fetch_catalog,
//! };
//! use ytgrab_core::progress::ProgressReport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractor = YtDlp::default();
//! let url = "https://youtu.be/dQw4w9WgXcQ";
//! let catalog = fetch_catalog(&extractor, url).await?;
//! let plan = DownloadPlan::new(
//!     url,
//!     "./downloads",
//!     catalog.title(),
//!     FormatSelector::BestCombined,
//!     TransferOptions::default(),
//! );
//! let decision = CollisionDecision::Proceed { overwrite: false };
//! let outcome = execute(&extractor, &plan, &decision, |report: &ProgressReport| {
//!     println!("{}", report.bytes_text());
//! })
//! .await?;
//! println!("downloaded: {}", outcome.is_downloaded());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::catalog::selection::FormatSelector;
use crate::catalog::{FormatCatalog, build_catalog};
use crate::collision::{CollisionDecision, DownloadTarget};
use crate::error::{FetchError, PostDownloadVerificationFailure};
use crate::extractor::{AudioExtraction, AudioQuality, Extractor, FetchRequest};
use crate::progress::{ProgressReporter, ProgressSink, verify_output};

/// Minimum number of concurrently fetched fragments.
pub const MIN_CONCURRENT_FRAGMENTS: u8 = 1;

/// Maximum number of concurrently fetched fragments.
pub const MAX_CONCURRENT_FRAGMENTS: u8 = 16;

/// Fragments fetched concurrently when nothing else is configured.
pub const DEFAULT_CONCURRENT_FRAGMENTS: u8 = 5;

/// Hosts accepted by the interactive surface.
const SUPPORTED_HOSTS: [&str; 2] = ["youtube.com", "youtu.be"];

/// Transfer tuning that does not affect where the file lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Fragments fetched concurrently, clamped to
    /// [`MIN_CONCURRENT_FRAGMENTS`]..=[`MAX_CONCURRENT_FRAGMENTS`].
    pub concurrent_fragments: u8,
    /// Bitrate used when the selector extracts audio.
    pub audio_quality: AudioQuality,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrent_fragments: DEFAULT_CONCURRENT_FRAGMENTS,
            audio_quality: AudioQuality::default(),
        }
    }
}

/// Everything needed to download one URL once the format is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPlan {
    pub url: String,
    pub target: DownloadTarget,
    pub selector: FormatSelector,
    pub options: TransferOptions,
}

impl DownloadPlan {
    /// Derives the destination from the title and the selector's expected
    /// output extension.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        directory: impl Into<PathBuf>,
        title: &str,
        selector: FormatSelector,
        options: TransferOptions,
    ) -> Self {
        let target = DownloadTarget::new(
            directory,
            title,
            selector.output_extension(),
            selector.extracts_audio(),
        );
        Self {
            url: url.into(),
            target,
            selector,
            options,
        }
    }

    /// Path the file is expected at once `decision` is applied.
    #[must_use]
    pub fn expected_path(&self, decision: &CollisionDecision) -> PathBuf {
        self.target
            .path_for(&decision.base_name(&self.target), &self.target.extension_hint)
    }

    /// Builds the collaborator request for `decision`.
    #[must_use]
    pub fn fetch_request(&self, decision: &CollisionDecision) -> FetchRequest {
        let base_name = decision.base_name(&self.target);
        let extracts_audio = self.selector.extracts_audio();
        FetchRequest {
            selector: self.selector.expression().to_string(),
            output_template: self
                .target
                .directory
                .join(format!("{}.%(ext)s", escape_template(&base_name))),
            container_preference: (!extracts_audio).then(|| "mp4".to_string()),
            concurrent_fragments: self
                .options
                .concurrent_fragments
                .clamp(MIN_CONCURRENT_FRAGMENTS, MAX_CONCURRENT_FRAGMENTS),
            overwrite: decision.overwrites(),
            no_playlist: true,
            audio_extraction: extracts_audio
                .then(|| AudioExtraction::mp3(self.options.audio_quality)),
        }
    }
}

/// Escapes `%` so a title is taken literally by `yt-dlp`'s output template.
fn escape_template(base_name: &str) -> String {
    base_name.replace('%', "%%")
}

/// How a download attempt ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The file is present at the expected path.
    Completed { path: PathBuf, size_bytes: u64 },
    /// The collaborator reported success but the file was not found where
    /// expected. Surfaced as a warning.
    Unverified(PostDownloadVerificationFailure),
    /// The user chose to keep the existing file; nothing was downloaded.
    Skipped { target: PathBuf },
}

impl DownloadOutcome {
    /// Whether the collaborator ran and reported success. Unverified
    /// downloads count: the collaborator said it succeeded.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

/// Queries the collaborator and builds the catalog.
///
/// # Errors
///
/// Returns [`FetchError::Resolution`] when the URL cannot be resolved; no
/// partial catalog is produced.
#[instrument(skip(extractor), fields(extractor = extractor.name()))]
pub async fn fetch_catalog<E>(extractor: &E, url: &str) -> Result<FormatCatalog, FetchError>
where
    E: Extractor + ?Sized,
{
    let metadata = extractor
        .resolve_formats(url)
        .await
        .map_err(|source| FetchError::resolution(url, source))?;
    let catalog = build_catalog(metadata);
    info!(
        title = %catalog.title(),
        video = catalog.video_count(),
        audio = catalog.audio_count(),
        "Catalog built"
    );
    Ok(catalog)
}

/// Creates `path` (and parents) if needed. Returns `true` when it was created.
///
/// # Errors
///
/// Returns [`FetchError::DirectoryCreation`] when the directory cannot be
/// created or the path exists but is not a directory.
pub async fn ensure_directory(path: &Path) -> Result<bool, FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(false),
        Ok(_) => {
            return Err(FetchError::directory_creation(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a directory",
                ),
            ));
        }
        Err(_) => {}
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| FetchError::directory_creation(path, source))?;
    info!(path = %path.display(), "Created directory");
    Ok(true)
}

/// Carries out a committed collision decision.
///
/// `Skip` returns immediately without touching the collaborator. Otherwise
/// the destination directory is ensured, the transfer runs while its progress
/// events are drained into `sink`, and the output is verified. A missing file
/// after a successful transfer is reported as
/// [`DownloadOutcome::Unverified`], not as an error.
///
/// # Errors
///
/// Returns [`FetchError::DirectoryCreation`] or [`FetchError::Download`].
#[instrument(skip(extractor, plan, decision, sink), fields(url = %plan.url, decision = ?decision))]
pub async fn execute<E, S>(
    extractor: &E,
    plan: &DownloadPlan,
    decision: &CollisionDecision,
    sink: S,
) -> Result<DownloadOutcome, FetchError>
where
    E: Extractor + ?Sized,
    S: ProgressSink,
{
    let expected = plan.expected_path(decision);
    if matches!(decision, CollisionDecision::Skip) {
        info!(path = %expected.display(), "Skipping download, keeping existing file");
        return Ok(DownloadOutcome::Skipped { target: expected });
    }

    ensure_directory(&plan.target.directory).await?;

    let request = plan.fetch_request(decision);
    debug!(selector = %request.selector, output = %request.output_template.display(), "Starting download");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reporter = ProgressReporter::new(sink);
    let transfer = extractor.fetch_and_download(&plan.url, &request, tx);
    let drain = async {
        while let Some(event) = rx.recv().await {
            reporter.observe(&event);
        }
    };
    let (result, ()) = tokio::join!(transfer, drain);

    let result = result.map_err(|source| FetchError::download(&plan.url, &expected, source))?;
    if let Some(reported) = &result.reported_path {
        info!(path = %reported.display(), "Collaborator reported destination");
    }

    match verify_output(&expected, result.reported_path.as_deref()).await {
        Ok(verified) => {
            info!(path = %verified.path.display(), bytes = verified.size_bytes, "Download complete");
            Ok(DownloadOutcome::Completed {
                path: verified.path,
                size_bytes: verified.size_bytes,
            })
        }
        Err(warning) => {
            warn!(%warning, "Download could not be verified");
            Ok(DownloadOutcome::Unverified(warning))
        }
    }
}

/// Whether `input` is an http(s) link on a supported video host.
#[must_use]
pub fn is_supported_url(input: &str) -> bool {
    let Ok(url) = Url::parse(input.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    url.host_str().is_some_and(|host| {
        SUPPORTED_HOSTS
            .iter()
            .any(|supported| host == *supported || host.ends_with(&format!(".{supported}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plan(dir: &Path, selector: FormatSelector) -> DownloadPlan {
        DownloadPlan::new(
            "https://youtu.be/abc",
            dir,
            "My Clip",
            selector,
            TransferOptions::default(),
        )
    }

    #[test]
    fn test_fetch_request_for_best_combined() {
        let plan = plan(Path::new("/videos"), FormatSelector::BestCombined);
        let request = plan.fetch_request(&CollisionDecision::Proceed { overwrite: false });

        assert_eq!(request.selector, "best[ext=mp4]");
        assert_eq!(request.output_template, PathBuf::from("/videos/My Clip.%(ext)s"));
        assert_eq!(request.container_preference.as_deref(), Some("mp4"));
        assert_eq!(request.concurrent_fragments, DEFAULT_CONCURRENT_FRAGMENTS);
        assert!(request.no_playlist);
        assert!(!request.overwrite);
        assert!(request.audio_extraction.is_none());
    }

    #[test]
    fn test_fetch_request_for_best_audio_rename() {
        let mut plan = plan(Path::new("/music"), FormatSelector::BestAudio);
        plan.options.audio_quality = AudioQuality::Kbps320;
        plan.options.concurrent_fragments = 99;
        let decision = CollisionDecision::RenameWithSuffix {
            suffix: "1700000000".to_string(),
        };
        let request = plan.fetch_request(&decision);

        assert_eq!(
            request.output_template,
            PathBuf::from("/music/My Clip_1700000000.%(ext)s")
        );
        assert_eq!(request.container_preference, None);
        assert_eq!(request.concurrent_fragments, MAX_CONCURRENT_FRAGMENTS);
        assert_eq!(
            request.audio_extraction,
            Some(AudioExtraction::mp3(AudioQuality::Kbps320))
        );
        assert_eq!(
            plan.expected_path(&decision),
            PathBuf::from("/music/My Clip_1700000000.mp3")
        );
    }

    #[test]
    fn test_fetch_request_escapes_percent_in_title() {
        let plan = DownloadPlan::new(
            "https://youtu.be/abc",
            "/videos",
            "100% Pure %(title)s",
            FormatSelector::BestCombined,
            TransferOptions::default(),
        );
        let decision = CollisionDecision::Proceed { overwrite: false };

        assert_eq!(
            plan.fetch_request(&decision).output_template,
            PathBuf::from("/videos/100%% Pure %%(title)s.%(ext)s")
        );
        assert_eq!(
            plan.expected_path(&decision),
            PathBuf::from("/videos/100% Pure %(title)s.mp4")
        );
    }

    #[tokio::test]
    async fn test_ensure_directory_creates_nested_path() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");

        assert!(ensure_directory(&nested).await.unwrap());
        assert!(nested.is_dir());
        assert!(!ensure_directory(&nested).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_directory_rejects_file_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = ensure_directory(&file).await.unwrap_err();
        assert!(matches!(err, FetchError::DirectoryCreation { .. }));
    }

    #[test]
    fn test_is_supported_url() {
        assert!(is_supported_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_supported_url("https://youtu.be/abc"));
        assert!(is_supported_url("http://m.youtube.com/watch?v=abc"));
        assert!(!is_supported_url("https://vimeo.com/123"));
        assert!(!is_supported_url("https://notyoutube.com/watch?v=abc"));
        assert!(!is_supported_url("ftp://youtube.com/x"));
        assert!(!is_supported_url("not a url"));
    }

    #[test]
    fn test_outcome_success_flags() {
        let skipped = DownloadOutcome::Skipped {
            target: PathBuf::from("/x.mp4"),
        };
        assert!(!skipped.is_downloaded());
        let unverified = DownloadOutcome::Unverified(PostDownloadVerificationFailure {
            expected: PathBuf::from("/x.mp4"),
            reported: None,
        });
        assert!(unverified.is_downloaded());
    }
}
