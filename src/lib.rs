//! ytgrab Core Library
//!
//! This library provides the core functionality for the ytgrab tool, which
//! fetches metadata for a hosted video, lets the user pick one of the
//! available encodings, and downloads it into a local directory.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`catalog`] - Format catalog construction and selection mapping
//! - [`collision`] - Decision engine for pre-existing files at the destination
//! - [`progress`] - Transfer progress derivation and post-download verification
//! - [`extractor`] - Capability boundary to the extraction/download tool (`yt-dlp`)
//! - [`pipeline`] - Download job shared by the command-line and interactive surfaces
//! - [`web`] - Interactive request/response surface with persisted session state

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod collision;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod progress;
pub mod web;

// Re-export commonly used types
pub use catalog::selection::{FormatSelector, parse_selection_input, resolve_selection};
pub use catalog::{
    BEST_AUDIO_EXPRESSION, BEST_COMBINED_EXPRESSION, CatalogEntry, FormatCatalog, FormatRow,
    StreamDescriptor, VideoMetadata, VirtualEntry, build_catalog,
};
pub use collision::{
    CollisionDecision, CollisionEngine, CollisionError, CollisionPhase, DownloadTarget, Step,
    UserChoice,
};
pub use error::{FetchError, PostDownloadVerificationFailure};
pub use extractor::{
    AudioExtraction, AudioQuality, DownloadResult, Extractor, ExtractorError, FetchRequest,
    ProgressSender, YtDlp,
};
pub use pipeline::{
    DEFAULT_CONCURRENT_FRAGMENTS, DownloadOutcome, DownloadPlan, TransferOptions, ensure_directory,
    execute, fetch_catalog, is_supported_url,
};
pub use progress::{
    ProgressEvent, ProgressReport, ProgressReporter, ProgressSink, ProgressSnapshot, ReportPhase,
    TransferStatus, VerifiedOutput, verify_output,
};
