//! Error taxonomy for a single fetch-and-download attempt.
//!
//! Every failure carries the URL and/or path involved plus the underlying
//! message so the user can retry by hand; nothing here is retried
//! automatically.

use std::path::PathBuf;

use thiserror::Error;

use crate::extractor::ExtractorError;

/// Failures that end a download attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be resolved into a catalog (unreachable, private,
    /// malformed). No partial catalog is kept.
    #[error("could not resolve {url}: {source}")]
    Resolution {
        /// The URL that failed to resolve.
        url: String,
        /// The collaborator error.
        #[source]
        source: ExtractorError,
    },

    /// The destination directory could not be created.
    #[error("could not create directory {}: {source}", path.display())]
    DirectoryCreation {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The collaborator reported a transport or codec failure.
    #[error("download of {url} to {} failed: {source}", target.display())]
    Download {
        /// The URL being downloaded.
        url: String,
        /// Expected output path.
        target: PathBuf,
        /// The collaborator error, surfaced verbatim.
        #[source]
        source: ExtractorError,
    },
}

impl FetchError {
    /// Creates a resolution failure.
    pub fn resolution(url: impl Into<String>, source: ExtractorError) -> Self {
        Self::Resolution {
            url: url.into(),
            source,
        }
    }

    /// Creates a directory creation failure.
    pub fn directory_creation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreation {
            path: path.into(),
            source,
        }
    }

    /// Creates a download failure.
    pub fn download(url: impl Into<String>, target: impl Into<PathBuf>, source: ExtractorError) -> Self {
        Self::Download {
            url: url.into(),
            target: target.into(),
            source,
        }
    }
}

/// The collaborator claimed success but nothing is at the expected path.
///
/// Warning-level: the expected path is a best-effort guess and the
/// collaborator may have picked a different final name.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("download possibly completed, but file not found at expected location: {}", expected.display())]
pub struct PostDownloadVerificationFailure {
    /// Path the download was expected at.
    pub expected: PathBuf,
    /// Path the collaborator announced, when it announced one.
    pub reported: Option<PathBuf>,
}
