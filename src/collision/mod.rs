//! Decision engine for pre-existing files at the download destination.
//!
//! The engine walks `Idle -> CheckingExistence -> {AwaitingUserDecision |
//! Resolved} -> Committed -> Idle`. Existence is checked when
//! [`CollisionEngine::evaluate`] runs, not when the catalog was fetched; the
//! gap between that check and the collaborator's write is a known,
//! accepted race.
//!
//! The engine state is serializable so request/response surfaces can persist
//! it between requests and resume with [`CollisionEngine::resume`] once the
//! user's answer arrives. Calling `evaluate` again while a decision is pending
//! re-checks the filesystem and leaves the pending state in place.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a download should land, before collision handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    /// Destination directory.
    pub directory: PathBuf,
    /// Sanitized base name derived from the video title.
    pub desired_base_name: String,
    /// Extension the collaborator is expected to produce.
    pub extension_hint: String,
    /// Whether the transfer is post-processed into an mp3.
    pub extracts_audio: bool,
}

impl DownloadTarget {
    /// Creates a target, sanitizing the title into a base name.
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        title: &str,
        extension_hint: impl Into<String>,
        extracts_audio: bool,
    ) -> Self {
        Self {
            directory: directory.into(),
            desired_base_name: sanitize_title(title),
            extension_hint: extension_hint.into(),
            extracts_audio,
        }
    }

    /// Path the collaborator is expected to write for the given base name.
    #[must_use]
    pub fn path_for(&self, base_name: &str, extension: &str) -> PathBuf {
        self.directory.join(format!("{base_name}.{extension}"))
    }

    /// Expected output path without any rename applied.
    #[must_use]
    pub fn expected_path(&self) -> PathBuf {
        self.path_for(&self.desired_base_name, &self.extension_hint)
    }

    /// Every extension the chosen stream could end up with on disk.
    ///
    /// Always includes the hint and the video container (`mp4`); adds `mp3`
    /// when audio extraction was requested.
    #[must_use]
    pub fn candidate_extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = vec![self.extension_hint.as_str()];
        let extra = ["mp4"]
            .into_iter()
            .chain(self.extracts_audio.then_some("mp3"));
        for ext in extra {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        extensions
    }

    /// Candidate final paths for the unrenamed base name.
    #[must_use]
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        self.candidates_for(&self.desired_base_name)
    }

    fn candidates_for(&self, base_name: &str) -> Vec<PathBuf> {
        self.candidate_extensions()
            .into_iter()
            .map(|ext| self.path_for(base_name, ext))
            .collect()
    }

    /// Candidate paths that currently exist on disk.
    #[must_use]
    pub fn existing_candidates(&self) -> Vec<PathBuf> {
        self.candidate_paths()
            .into_iter()
            .filter(|path| path.exists())
            .collect()
    }
}

/// Replaces path separators in a title so it is usable as a file name.
///
/// Surrounding whitespace is trimmed; an empty title becomes `video`.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let sanitized = title.trim().replace(['/', '\\'], "_");
    if sanitized.is_empty() {
        "video".to_string()
    } else {
        sanitized
    }
}

/// What to do about the destination. Consumed exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CollisionDecision {
    /// Download to the original name.
    Proceed {
        /// Whether an existing file may be replaced.
        overwrite: bool,
    },
    /// Download to `<base>_<suffix>.<ext>`.
    RenameWithSuffix {
        /// Disambiguator appended to the base name.
        suffix: String,
    },
    /// Do not invoke the collaborator.
    Skip,
}

impl CollisionDecision {
    /// Base name to download under once this decision is applied.
    #[must_use]
    pub fn base_name(&self, target: &DownloadTarget) -> String {
        match self {
            Self::RenameWithSuffix { suffix } => {
                format!("{}_{suffix}", target.desired_base_name)
            }
            Self::Proceed { .. } | Self::Skip => target.desired_base_name.clone(),
        }
    }

    /// Whether the collaborator may overwrite an existing file.
    #[must_use]
    pub fn overwrites(&self) -> bool {
        matches!(self, Self::Proceed { overwrite: true })
    }
}

/// The three answers offered while a decision is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserChoice {
    /// Replace the existing file.
    Redownload,
    /// Keep the existing file and download under a disambiguated name.
    NewName,
    /// Leave everything as is.
    Skip,
}

impl UserChoice {
    /// All choices, in presentation order.
    pub const ALL: [Self; 3] = [Self::Redownload, Self::NewName, Self::Skip];

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Redownload => "Re-download",
            Self::NewName => "Download with new name",
            Self::Skip => "Skip",
        }
    }

    /// Interprets a line-mode answer: `y` re-downloads, `r` renames,
    /// anything else skips.
    #[must_use]
    pub fn from_line_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Self::Redownload,
            "r" | "rename" => Self::NewName,
            _ => Self::Skip,
        }
    }
}

/// Public view of the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPhase {
    Idle,
    AwaitingUserDecision,
    Resolved,
}

/// Result of one evaluation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A decision is ready; take it with [`CollisionEngine::commit`].
    Resolved(CollisionDecision),
    /// Execution must suspend until the user answers.
    AwaitingUserDecision {
        /// Candidate paths that already exist.
        existing: Vec<PathBuf>,
    },
}

/// Errors from out-of-order engine calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollisionError {
    /// A choice arrived while no decision was pending.
    #[error("no collision decision is pending")]
    NotAwaiting,

    /// A choice arrived for a different destination than the pending one.
    #[error("pending decision is for {}, not {}", pending.display(), requested.display())]
    TargetMismatch {
        /// Expected path of the pending target.
        pending: PathBuf,
        /// Expected path of the target in the request.
        requested: PathBuf,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum EngineState {
    #[default]
    Idle,
    Awaiting {
        target: DownloadTarget,
        existing: Vec<PathBuf>,
    },
    Resolved {
        target: DownloadTarget,
        decision: CollisionDecision,
    },
}

/// Collision state machine for one destination at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEngine {
    state: EngineState,
}

impl CollisionEngine {
    /// Creates an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> CollisionPhase {
        match self.state {
            EngineState::Idle => CollisionPhase::Idle,
            EngineState::Awaiting { .. } => CollisionPhase::AwaitingUserDecision,
            EngineState::Resolved { .. } => CollisionPhase::Resolved,
        }
    }

    /// Target of the pending decision, if any.
    #[must_use]
    pub fn pending_target(&self) -> Option<&DownloadTarget> {
        match &self.state {
            EngineState::Awaiting { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Existing paths that triggered the pending decision.
    #[must_use]
    pub fn pending_existing(&self) -> &[PathBuf] {
        match &self.state {
            EngineState::Awaiting { existing, .. } => existing,
            _ => &[],
        }
    }

    /// Checks the destination and either resolves automatically or suspends.
    ///
    /// - No candidate path exists: `Proceed { overwrite: false }`.
    /// - A candidate exists and `force` is set: `Proceed { overwrite: true }`.
    /// - Otherwise: awaiting a user decision.
    ///
    /// Re-entrant: an uncommitted decision for the same target is returned
    /// again; state left over from a different target is discarded.
    pub fn evaluate(&mut self, target: &DownloadTarget, force: bool) -> Step {
        match &self.state {
            EngineState::Resolved {
                target: resolved,
                decision,
            } if resolved == target => {
                return Step::Resolved(decision.clone());
            }
            EngineState::Idle => {}
            EngineState::Awaiting { target: pending, .. }
            | EngineState::Resolved {
                target: pending, ..
            } => {
                if pending != target {
                    warn!(
                        stale = %pending.expected_path().display(),
                        requested = %target.expected_path().display(),
                        "Discarding collision state left over from another download"
                    );
                    self.state = EngineState::Idle;
                }
            }
        }

        let existing = target.existing_candidates();
        if existing.is_empty() {
            debug!(path = %target.expected_path().display(), "Destination is free");
            return self.resolve(target, CollisionDecision::Proceed { overwrite: false });
        }
        if force {
            info!(path = %existing[0].display(), "File exists, forcing re-download");
            return self.resolve(target, CollisionDecision::Proceed { overwrite: true });
        }

        debug!(existing = existing.len(), "Awaiting user decision on existing file");
        self.state = EngineState::Awaiting {
            target: target.clone(),
            existing: existing.clone(),
        };
        Step::AwaitingUserDecision { existing }
    }

    /// Applies the user's answer to the pending decision.
    ///
    /// `now_secs` seeds the rename disambiguator; the suffix used is strictly
    /// later than the modification time of every existing candidate and
    /// does not collide with an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError::NotAwaiting`] when no decision is pending and
    /// [`CollisionError::TargetMismatch`] when the pending decision is for
    /// another destination.
    pub fn decide(
        &mut self,
        target: &DownloadTarget,
        choice: UserChoice,
        now_secs: u64,
    ) -> Result<CollisionDecision, CollisionError> {
        let EngineState::Awaiting {
            target: pending,
            existing,
        } = &self.state
        else {
            return Err(CollisionError::NotAwaiting);
        };
        if pending != target {
            return Err(CollisionError::TargetMismatch {
                pending: pending.expected_path(),
                requested: target.expected_path(),
            });
        }

        let decision = match choice {
            UserChoice::Redownload => CollisionDecision::Proceed { overwrite: true },
            UserChoice::NewName => {
                let start = next_disambiguator(existing, now_secs);
                let suffix = unique_suffix(target, start);
                CollisionDecision::RenameWithSuffix {
                    suffix: suffix.to_string(),
                }
            }
            UserChoice::Skip => CollisionDecision::Skip,
        };
        info!(choice = ?choice, decision = ?decision, "Collision decision made");
        self.state = EngineState::Resolved {
            target: target.clone(),
            decision: decision.clone(),
        };
        Ok(decision)
    }

    /// Evaluates and, if suspended and an answer is at hand, applies it.
    ///
    /// This is the entry point for surfaces that restart from persisted state
    /// on every request. `choice` only answers a prompt that was already
    /// pending for this same target; an answer arriving on an idle engine, or
    /// one left over from another target, is dropped and the prompt is raised
    /// instead.
    pub fn resume(
        &mut self,
        target: &DownloadTarget,
        force: bool,
        choice: Option<UserChoice>,
        now_secs: u64,
    ) -> Step {
        let prompted = self.pending_target() == Some(target);
        let step = self.evaluate(target, force);
        match (step, choice) {
            (Step::AwaitingUserDecision { existing }, Some(choice)) if prompted => {
                match self.decide(target, choice, now_secs) {
                    Ok(decision) => Step::Resolved(decision),
                    Err(err) => {
                        // evaluate() just left us awaiting on this target
                        warn!(error = %err, "Could not apply collision decision");
                        Step::AwaitingUserDecision { existing }
                    }
                }
            }
            (Step::AwaitingUserDecision { existing }, Some(choice)) => {
                warn!(
                    choice = ?choice,
                    path = %target.expected_path().display(),
                    "Ignoring answer to a prompt that was never shown for this file"
                );
                Step::AwaitingUserDecision { existing }
            }
            (step, _) => step,
        }
    }

    /// Takes the resolved decision and returns the engine to idle.
    ///
    /// Returns `None` unless a decision is resolved; a decision is handed out
    /// at most once.
    pub fn commit(&mut self) -> Option<CollisionDecision> {
        match std::mem::take(&mut self.state) {
            EngineState::Resolved { decision, .. } => Some(decision),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Drops any pending or resolved state.
    pub fn reset(&mut self) {
        self.state = EngineState::Idle;
    }

    fn resolve(&mut self, target: &DownloadTarget, decision: CollisionDecision) -> Step {
        self.state = EngineState::Resolved {
            target: target.clone(),
            decision: decision.clone(),
        };
        Step::Resolved(decision)
    }
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// First disambiguator candidate: the current time, bumped past the newest
/// modification second among `existing`.
#[must_use]
pub fn next_disambiguator(existing: &[PathBuf], now_secs: u64) -> u64 {
    existing
        .iter()
        .filter_map(|path| modified_secs(path))
        .map(|secs| secs.saturating_add(1))
        .fold(now_secs, u64::max)
}

fn modified_secs(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Smallest suffix `>= start` whose candidate paths are all free.
fn unique_suffix(target: &DownloadTarget, start: u64) -> u64 {
    let mut suffix = start;
    for _ in 0..1000 {
        let base = format!("{}_{suffix}", target.desired_base_name);
        if target.candidates_for(&base).iter().all(|path| !path.exists()) {
            return suffix;
        }
        suffix = suffix.saturating_add(1);
    }
    suffix
}
