//! JSON handlers for the interactive surface.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, debug, info, instrument};

use super::session::{FormState, Session, SessionStore};
use super::{ApiError, AppState};
use crate::catalog::selection::resolve_selection;
use crate::catalog::{FormatCatalog, FormatRow, format_duration};
use crate::collision::{CollisionDecision, CollisionPhase, Step, UserChoice, now_unix_secs};
use crate::error::FetchError;
use crate::extractor::{AudioQuality, Extractor};
use crate::pipeline::{
    DownloadOutcome, DownloadPlan, ensure_directory, execute, fetch_catalog, is_supported_url,
};
use crate::progress::ProgressReport;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    pub form: FormState,
}

/// One of the answers offered by the collision prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceView {
    pub value: UserChoice,
    pub label: String,
}

/// Pending "file already exists" question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionPrompt {
    pub existing: Vec<PathBuf>,
    pub choices: Vec<ChoiceView>,
}

impl CollisionPrompt {
    fn new(existing: Vec<PathBuf>) -> Self {
        Self {
            existing,
            choices: UserChoice::ALL
                .into_iter()
                .map(|value| ChoiceView {
                    value,
                    label: value.label().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub form: FormState,
    pub title: Option<String>,
    pub rows: Vec<FormatRow>,
    pub collision: Option<CollisionPrompt>,
    pub progress: Option<ProgressReport>,
    pub last_outcome: Option<DownloadOutcome>,
    /// Failure of the last transfer, kept for clients that stopped waiting.
    pub last_error: Option<String>,
    pub busy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FormatsRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub url: String,
    pub title: String,
    /// `MM:SS` or `Unknown`.
    pub duration: String,
    pub views: String,
    pub rows: Vec<FormatRow>,
    /// Index preselected in the form (best combined).
    pub default_selection: usize,
}

impl FormatsResponse {
    fn new(url: String, catalog: &FormatCatalog) -> Self {
        Self {
            url,
            title: catalog.title().to_string(),
            duration: format_duration(catalog.duration_secs()),
            views: catalog
                .view_count()
                .map_or_else(|| "Unknown".to_string(), |views| views.to_string()),
            rows: catalog.rows(),
            default_selection: catalog.best_combined_index(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryRequest {
    pub directory: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryResponse {
    pub directory: PathBuf,
    /// Whether the directory had to be created.
    pub created: bool,
}

/// Body of a download request. Omitted fields fall back to the session form;
/// an omitted `selection` is taken from the form only for the same URL.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub selection: Option<usize>,
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub concurrent_fragments: Option<u8>,
    #[serde(default)]
    pub audio_quality: Option<AudioQuality>,
    /// Answer to a collision prompt raised by an earlier request.
    #[serde(default)]
    pub decision: Option<UserChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResponse {
    /// The destination exists; ask again with a `decision`.
    Collision {
        existing: Vec<PathBuf>,
        choices: Vec<ChoiceView>,
    },
    Skipped {
        target: PathBuf,
    },
    Completed {
        path: PathBuf,
        size_bytes: u64,
    },
    /// The transfer reported success but the file was not found.
    Unverified {
        warning: String,
        expected: PathBuf,
        reported: Option<PathBuf>,
    },
}

impl From<DownloadOutcome> for DownloadResponse {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Completed { path, size_bytes } => Self::Completed { path, size_bytes },
            DownloadOutcome::Skipped { target } => Self::Skipped { target },
            DownloadOutcome::Unverified(failure) => Self::Unverified {
                warning: failure.to_string(),
                expected: failure.expected,
                reported: failure.reported,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub busy: bool,
    pub progress: Option<ProgressReport>,
    /// `50.0%`, absent while indeterminate.
    pub percent: Option<String>,
    pub status: Option<String>,
}

fn session_or_404(store: &SessionStore, id: &str) -> Result<Session, ApiError> {
    store
        .get(id)
        .ok_or_else(|| ApiError::SessionNotFound(id.to_string()))
}

fn require_supported(url: &str) -> Result<String, ApiError> {
    let url = url.trim();
    if is_supported_url(url) {
        Ok(url.to_string())
    } else {
        Err(ApiError::UnsupportedUrl(url.to_string()))
    }
}

/// Clears the session's busy flag when the transfer ends or is dropped.
struct BusyGuard {
    store: Arc<SessionStore>,
    id: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.store.update(&self.id, |session| session.busy = false);
    }
}

pub(super) async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreatedSession>) {
    let (id, session) = state.store.create();
    (
        StatusCode::CREATED,
        Json(CreatedSession {
            id,
            form: session.form,
        }),
    )
}

pub(super) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = session_or_404(&state.store, &id)?;
    let collision = (session.collision.phase() == CollisionPhase::AwaitingUserDecision)
        .then(|| CollisionPrompt::new(session.collision.pending_existing().to_vec()));
    let (title, rows) = session
        .catalog
        .as_ref()
        .map(|(_, catalog)| (Some(catalog.title().to_string()), catalog.rows()))
        .unwrap_or_default();

    Ok(Json(SessionView {
        id,
        form: session.form,
        title,
        rows,
        collision,
        progress: session.progress,
        last_outcome: session.last_outcome,
        last_error: session.last_error,
        busy: session.busy,
    }))
}

#[instrument(skip(state, body), fields(url = %body.url))]
pub(super) async fn resolve_formats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FormatsRequest>,
) -> Result<Json<FormatsResponse>, ApiError> {
    session_or_404(&state.store, &id)?;
    let url = require_supported(&body.url)?;

    let catalog = match fetch_catalog(state.extractor.as_ref(), &url).await {
        Ok(catalog) => catalog,
        Err(err) => {
            state.store.update(&id, |session| session.catalog = None);
            return Err(err.into());
        }
    };

    let response = FormatsResponse::new(url.clone(), &catalog);
    state.store.update(&id, |session| {
        session.form.url.clone_from(&url);
        session.form.selection = None;
        session.catalog = Some((url, catalog));
    });
    Ok(Json(response))
}

pub(super) async fn create_directory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DirectoryRequest>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    session_or_404(&state.store, &id)?;
    let created = ensure_directory(&body.directory).await?;
    state
        .store
        .update(&id, |session| session.form.directory.clone_from(&body.directory));
    Ok(Json(DirectoryResponse {
        directory: body.directory,
        created,
    }))
}

/// Runs one step of the collision engine persisted in the session and, when
/// a decision is available, the download itself.
#[instrument(skip(state, body), fields(url = %body.url, decision = ?body.decision))]
pub(super) async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let session = session_or_404(&state.store, &id)?;
    if session.busy {
        return Err(ApiError::Busy);
    }
    let url = require_supported(&body.url)?;

    let form = FormState {
        url: url.clone(),
        directory: body.directory.unwrap_or(session.form.directory.clone()),
        // a remembered index only means something for the catalog it came from
        selection: body
            .selection
            .or_else(|| (session.form.url == url).then_some(session.form.selection).flatten()),
        force: body.force.unwrap_or(session.form.force),
        concurrent_fragments: body
            .concurrent_fragments
            .unwrap_or(session.form.concurrent_fragments),
        audio_quality: body.audio_quality.unwrap_or(session.form.audio_quality),
    };

    let catalog = match session.catalog_for(&url) {
        Some(catalog) => catalog.clone(),
        None => fetch_catalog(state.extractor.as_ref(), &url).await?,
    };
    let selector = resolve_selection(&catalog, form.selection);
    let plan = DownloadPlan::new(
        url.clone(),
        form.directory.clone(),
        catalog.title(),
        selector,
        form.transfer_options(),
    );

    let mut engine = session.collision;
    let decision = match engine.resume(&plan.target, form.force, body.decision, now_unix_secs()) {
        Step::AwaitingUserDecision { existing } => {
            debug!(existing = existing.len(), "Suspending for collision decision");
            state.store.update(&id, |session| {
                session.form = form;
                session.catalog = Some((url, catalog));
                session.collision = engine;
            });
            let prompt = CollisionPrompt::new(existing);
            return Ok(Json(DownloadResponse::Collision {
                existing: prompt.existing,
                choices: prompt.choices,
            }));
        }
        Step::Resolved(decision) => engine.commit().unwrap_or(decision),
    };

    let claimed = state
        .store
        .update(&id, |session| {
            if session.busy {
                return false;
            }
            session.busy = true;
            session.form = form;
            session.catalog = Some((url, catalog));
            session.collision = engine;
            session.progress = None;
            session.last_outcome = None;
            session.last_error = None;
            true
        })
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
    if !claimed {
        return Err(ApiError::Busy);
    }
    let busy = BusyGuard {
        store: Arc::clone(&state.store),
        id: id.clone(),
    };

    info!(target_path = %plan.expected_path(&decision).display(), "Starting download");
    // The transfer outlives this request: a client that disconnects must not
    // cancel a running yt-dlp.
    let transfer = tokio::spawn(
        run_transfer(
            Arc::clone(&state.store),
            Arc::clone(&state.extractor),
            id,
            plan,
            decision,
            busy,
        )
        .instrument(Span::current()),
    );
    let outcome = transfer
        .await
        .map_err(|err| ApiError::TransferTask(err.to_string()))??;
    Ok(Json(outcome.into()))
}

/// Runs a committed download and records its result in the session.
///
/// Owns the busy guard, so the session is released only once the transfer
/// has finished, whether or not anyone is still waiting for the response.
async fn run_transfer(
    store: Arc<SessionStore>,
    extractor: Arc<dyn Extractor>,
    id: String,
    plan: DownloadPlan,
    decision: CollisionDecision,
    _busy: BusyGuard,
) -> Result<DownloadOutcome, FetchError> {
    let sink_store = Arc::clone(&store);
    let sink_id = id.clone();
    let sink = move |report: &ProgressReport| {
        sink_store.update(&sink_id, |session| session.progress = Some(report.clone()));
    };

    let result = execute(extractor.as_ref(), &plan, &decision, sink).await;
    store.update(&id, |session| match &result {
        Ok(outcome) => session.last_outcome = Some(outcome.clone()),
        Err(err) => session.last_error = Some(err.to_string()),
    });
    result
}

pub(super) async fn progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let session = session_or_404(&state.store, &id)?;
    Ok(Json(ProgressResponse {
        busy: session.busy,
        percent: session.progress.as_ref().and_then(ProgressReport::percent_text),
        status: session.progress.as_ref().map(ProgressReport::status_text),
        progress: session.progress,
    }))
}
