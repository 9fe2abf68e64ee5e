//! Interactive request/response surface.
//!
//! A small JSON service over the download form: resolve formats, pick a
//! directory, start a download, answer the collision prompt, poll progress.
//! Each request rebuilds its state from the [`SessionStore`], so the
//! collision state machine is persisted between the request that raises the
//! prompt and the request that answers it.
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/api/sessions` | new session with default form values |
//! | GET | `/api/sessions/{id}` | form, catalog rows, pending prompt |
//! | POST | `/api/sessions/{id}/formats` | resolve the catalog for a URL |
//! | POST | `/api/sessions/{id}/directory` | create the destination directory |
//! | POST | `/api/sessions/{id}/download` | run one collision step and download |
//! | GET | `/api/sessions/{id}/progress` | latest progress report |

mod handlers;
pub mod session;

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::FetchError;
use crate::extractor::Extractor;

pub use handlers::{
    ChoiceView, CollisionPrompt, CreatedSession, DirectoryRequest, DirectoryResponse,
    DownloadRequest, DownloadResponse, FormatsRequest, FormatsResponse, ProgressResponse,
    SessionView,
};
pub use session::{
    DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE_TTL, FormState, Session, SessionStore,
};

/// Default listen address of the interactive surface.
pub const DEFAULT_BIND: &str = "127.0.0.1:8501";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub extractor: Arc<dyn Extractor>,
}

impl AppState {
    pub fn new(extractor: Arc<dyn Extractor>, defaults: FormState) -> Self {
        Self {
            store: Arc::new(SessionStore::new(defaults)),
            extractor,
        }
    }
}

/// Request failures, rendered as `{"error": ..., "message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No session with that id.
    #[error("unknown session {0}")]
    SessionNotFound(String),

    /// The URL is not a supported video link.
    #[error("please enter a valid YouTube URL: {0}")]
    UnsupportedUrl(String),

    /// A transfer is already running for this session.
    #[error("a download is already running for this session")]
    Busy,

    /// The fetch pipeline failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The background transfer task panicked or was cancelled.
    #[error("download task ended abnormally: {0}")]
    TransferTask(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnsupportedUrl(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Busy => StatusCode::CONFLICT,
            Self::TransferTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Fetch(FetchError::DirectoryCreation { .. }) => StatusCode::BAD_REQUEST,
            Self::Fetch(FetchError::Resolution { .. } | FetchError::Download { .. }) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::UnsupportedUrl(_) => "unsupported_url",
            Self::Busy => "busy",
            Self::TransferTask(_) => "internal_error",
            Self::Fetch(FetchError::Resolution { .. }) => "resolution_failure",
            Self::Fetch(FetchError::DirectoryCreation { .. }) => "directory_creation_failure",
            Self::Fetch(FetchError::Download { .. }) => "download_failure",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router with all routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/{id}", get(handlers::get_session))
        .route("/api/sessions/{id}/formats", post(handlers::resolve_formats))
        .route("/api/sessions/{id}/directory", post(handlers::create_directory))
        .route("/api/sessions/{id}/download", post(handlers::download))
        .route("/api/sessions/{id}/progress", get(handlers::progress))
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` completes.
///
/// # Errors
///
/// Returns the IO error that stopped the server.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Interactive surface listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
