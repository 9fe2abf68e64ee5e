//! Transfer progress derivation and post-download verification.
//!
//! The collaborator pushes one [`ProgressEvent`] per progress tick. The
//! [`ProgressReporter`] turns each event into a [`ProgressReport`] and hands
//! it to a [`ProgressSink`] (terminal bar, session store, test collector).
//! Missing optional fields are a normal state: they produce an indeterminate
//! report, never an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::PostDownloadVerificationFailure;

const MIB: f64 = 1024.0 * 1024.0;

/// Status tag carried by every collaborator progress event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Downloading,
    Finished,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One progress tick as reported by the collaborator.
///
/// Field names follow `yt-dlp`'s progress dictionary so the JSON it prints
/// deserializes directly. Every numeric field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub status: TransferStatus,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub total_bytes_estimate: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<f64>,
    pub filename: Option<String>,
}

impl ProgressEvent {
    /// A `downloading` event with the given counters.
    #[must_use]
    pub fn downloading(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: TransferStatus::Downloading,
            downloaded_bytes: Some(to_f64(downloaded_bytes)),
            total_bytes: total_bytes.map(to_f64),
            ..Self::default()
        }
    }

    /// A terminal `finished` event.
    #[must_use]
    pub fn finished() -> Self {
        Self {
            status: TransferStatus::Finished,
            ..Self::default()
        }
    }

    /// Sets throughput and ETA.
    #[must_use]
    pub fn with_rate(mut self, speed: Option<f64>, eta: Option<f64>) -> Self {
        self.speed = speed;
        self.eta = eta;
        self
    }
}

/// Normalized view of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: TransferStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    /// Normalizes an event. Non-positive or non-finite values count as absent;
    /// the exact total wins over the estimate.
    #[must_use]
    pub fn from_event(event: &ProgressEvent) -> Self {
        let total_bytes = event
            .total_bytes
            .and_then(positive_bytes)
            .or_else(|| event.total_bytes_estimate.and_then(positive_bytes));
        Self {
            status: event.status,
            downloaded_bytes: event.downloaded_bytes.and_then(positive_bytes).unwrap_or(0),
            total_bytes,
            speed_bytes_per_sec: event.speed.filter(|s| s.is_finite() && *s > 0.0),
            eta_seconds: event.eta.and_then(positive_bytes),
        }
    }

    /// Completed fraction in `[0, 1]`, `None` when the total is unknown.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        Some((to_f64(self.downloaded_bytes) / to_f64(total)).min(1.0))
    }
}

/// What the user should currently see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPhase {
    /// Bytes are flowing.
    Downloading,
    /// Transfer done; post-processing (merge, audio extraction) may still run.
    Processing,
}

/// Display-ready progress state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub phase: ReportPhase,
    /// Completed fraction in `[0, 1]`; `None` is indeterminate.
    pub fraction: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Throughput, e.g. `1.50 MB/s`, or `N/A`.
    pub speed: String,
    /// Remaining time, e.g. `2m 5s`, or `N/A`.
    pub eta: String,
}

impl ProgressReport {
    fn downloading(snapshot: &ProgressSnapshot) -> Self {
        Self {
            phase: ReportPhase::Downloading,
            fraction: snapshot.fraction(),
            downloaded_bytes: snapshot.downloaded_bytes,
            total_bytes: snapshot.total_bytes,
            speed: format_speed(snapshot.speed_bytes_per_sec),
            eta: format_eta(snapshot.eta_seconds),
        }
    }

    fn processing(previous: Option<&Self>) -> Self {
        Self {
            phase: ReportPhase::Processing,
            fraction: Some(1.0),
            downloaded_bytes: previous.map_or(0, |r| r.downloaded_bytes),
            total_bytes: previous.and_then(|r| r.total_bytes),
            speed: "N/A".to_string(),
            eta: "N/A".to_string(),
        }
    }

    /// Percentage text such as `50.0%`, `None` when indeterminate.
    #[must_use]
    pub fn percent_text(&self) -> Option<String> {
        self.fraction.map(|f| format!("{:.1}%", f * 100.0))
    }

    /// One-line byte summary: `5.0 MB of 10.0 MB (50.0%)` or
    /// `5.0 MB downloaded (unknown total)`.
    #[must_use]
    pub fn bytes_text(&self) -> String {
        let downloaded = format_megabytes(self.downloaded_bytes);
        match (self.total_bytes, self.percent_text()) {
            (Some(total), Some(percent)) => {
                format!("{downloaded} of {} ({percent})", format_megabytes(total))
            }
            _ => format!("{downloaded} downloaded (unknown total)"),
        }
    }

    /// Status line for the current phase.
    #[must_use]
    pub fn status_text(&self) -> String {
        match self.phase {
            ReportPhase::Downloading => format!("Downloading at {}", self.speed),
            ReportPhase::Processing => "Download complete, now processing...".to_string(),
        }
    }
}

/// Receives display updates.
pub trait ProgressSink {
    fn update(&mut self, report: &ProgressReport);
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressReport),
{
    fn update(&mut self, report: &ProgressReport) {
        self(report);
    }
}

/// Consumes the events of a single transfer.
///
/// All `downloading` events precede at most one `finished` event; anything
/// arriving after `finished` is ignored.
pub struct ProgressReporter<S> {
    sink: S,
    last: Option<ProgressReport>,
    finished: bool,
}

impl<S: ProgressSink> ProgressReporter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last: None,
            finished: false,
        }
    }

    /// Processes one event and forwards the derived report to the sink.
    pub fn observe(&mut self, event: &ProgressEvent) {
        if self.finished {
            trace!(status = ?event.status, "Ignoring progress event after finish");
            return;
        }
        let report = match event.status {
            TransferStatus::Downloading => {
                ProgressReport::downloading(&ProgressSnapshot::from_event(event))
            }
            TransferStatus::Finished => {
                self.finished = true;
                debug!("Transfer finished, post-processing may follow");
                ProgressReport::processing(self.last.as_ref())
            }
            TransferStatus::Unknown => {
                debug!("Ignoring progress event with unknown status");
                return;
            }
        };
        self.sink.update(&report);
        self.last = Some(report);
    }

    /// Most recent report, if any.
    #[must_use]
    pub fn last_report(&self) -> Option<&ProgressReport> {
        self.last.as_ref()
    }

    /// Whether the terminal `finished` event was seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Releases the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// A file confirmed present after the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Checks that the collaborator left a file at the expected path.
///
/// # Errors
///
/// Returns [`PostDownloadVerificationFailure`] (a warning, not a fatal
/// error) when nothing is there. `reported` is the path the collaborator
/// announced, included for context.
pub async fn verify_output(
    expected: &Path,
    reported: Option<&Path>,
) -> Result<VerifiedOutput, PostDownloadVerificationFailure> {
    match tokio::fs::metadata(expected).await {
        Ok(meta) if meta.is_file() => Ok(VerifiedOutput {
            path: expected.to_path_buf(),
            size_bytes: meta.len(),
        }),
        _ => {
            warn!(expected = %expected.display(), "Expected output file is missing");
            Err(PostDownloadVerificationFailure {
                expected: expected.to_path_buf(),
                reported: reported.map(Path::to_path_buf),
            })
        }
    }
}

/// Formats throughput as `x.xx MB/s`, or `N/A` when unknown.
#[must_use]
pub fn format_speed(speed: Option<f64>) -> String {
    match speed {
        Some(speed) if speed > 0.0 => format!("{:.2} MB/s", speed / MIB),
        _ => "N/A".to_string(),
    }
}

/// Formats remaining time as `Xm Ys`, or `N/A` when unknown.
#[must_use]
pub fn format_eta(eta: Option<u64>) -> String {
    match eta {
        Some(eta) if eta > 0 => format!("{}m {}s", eta / 60, eta % 60),
        _ => "N/A".to_string(),
    }
}

/// Formats a byte count as `x.x MB`.
#[must_use]
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", to_f64(bytes) / MIB)
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: u64) -> f64 {
    value as f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn positive_bytes(value: f64) -> Option<u64> {
    (value.is_finite() && value > 0.0).then(|| value.round() as u64)
}
