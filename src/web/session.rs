//! Per-visitor form state for the interactive surface.
//!
//! Every request restarts from what is stored here. Sessions are kept in a
//! `DashMap`; callers clone what they need out of the map and never hold a
//! guard across an `.await`.
//!
//! Sessions idle for longer than the store's TTL are evicted when a new one
//! is created, and the map never holds more than its cap. A session with a
//! running transfer is never evicted.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::FormatCatalog;
use crate::collision::CollisionEngine;
use crate::extractor::AudioQuality;
use crate::pipeline::{DownloadOutcome, TransferOptions};
use crate::progress::ProgressReport;

/// Values of the download form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormState {
    pub url: String,
    pub directory: PathBuf,
    /// Display index of the chosen catalog entry; `None` means best combined.
    pub selection: Option<usize>,
    pub force: bool,
    pub concurrent_fragments: u8,
    pub audio_quality: AudioQuality,
}

impl FormState {
    /// Empty form pointing at `directory` with the given transfer defaults.
    #[must_use]
    pub fn with_defaults(directory: impl Into<PathBuf>, options: TransferOptions) -> Self {
        Self {
            url: String::new(),
            directory: directory.into(),
            selection: None,
            force: false,
            concurrent_fragments: options.concurrent_fragments,
            audio_quality: options.audio_quality,
        }
    }

    #[must_use]
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            concurrent_fragments: self.concurrent_fragments,
            audio_quality: self.audio_quality,
        }
    }
}

/// Everything remembered between two requests of one visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub form: FormState,
    /// Catalog of the last resolved URL, with the URL it belongs to.
    pub catalog: Option<(String, FormatCatalog)>,
    pub collision: CollisionEngine,
    pub progress: Option<ProgressReport>,
    pub last_outcome: Option<DownloadOutcome>,
    /// Message of the last failed transfer.
    pub last_error: Option<String>,
    /// A transfer is running for this session.
    pub busy: bool,
}

impl Session {
    fn new(form: FormState) -> Self {
        Self {
            form,
            catalog: None,
            collision: CollisionEngine::new(),
            progress: None,
            last_outcome: None,
            last_error: None,
            busy: false,
        }
    }

    /// Catalog for `url`, if that is the URL last resolved.
    #[must_use]
    pub fn catalog_for(&self, url: &str) -> Option<&FormatCatalog> {
        self.catalog
            .as_ref()
            .filter(|(resolved, _)| resolved == url)
            .map(|(_, catalog)| catalog)
    }
}

/// Sessions untouched for this long are dropped.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug)]
struct StoredSession {
    session: Session,
    touched: Instant,
}

/// Concurrent session map keyed by random hex ids.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, StoredSession>,
    defaults: FormState,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    #[must_use]
    pub fn new(defaults: FormState) -> Self {
        Self::with_limits(defaults, DEFAULT_SESSION_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }

    /// Store with an explicit idle TTL and session cap (at least one).
    #[must_use]
    pub fn with_limits(defaults: FormState, idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            defaults,
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Form values new sessions start with.
    #[must_use]
    pub fn defaults(&self) -> &FormState {
        &self.defaults
    }

    /// Creates a session with default form values and returns its id.
    ///
    /// Evicts idle sessions first, then the least recently used ones while
    /// the store is at its cap.
    pub fn create(&self) -> (String, Session) {
        self.evict(Instant::now());
        let session = Session::new(self.defaults.clone());
        loop {
            let id = new_session_id();
            if let dashmap::mapref::entry::Entry::Vacant(entry) = self.sessions.entry(id.clone()) {
                entry.insert(StoredSession {
                    session: session.clone(),
                    touched: Instant::now(),
                });
                debug!(session = %id, "Session created");
                return (id, session);
            }
        }
    }

    /// Snapshot of a session. Counts as activity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get_mut(id).map(|mut entry| {
            entry.touched = Instant::now();
            entry.session.clone()
        })
    }

    /// Runs `f` against a session under its map guard. Counts as activity.
    ///
    /// `f` must not block; the guard is released when it returns.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(id).map(|mut entry| {
            entry.touched = Instant::now();
            f(&mut entry.session)
        })
    }

    fn evict(&self, now: Instant) {
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| {
            stored.session.busy || now.saturating_duration_since(stored.touched) < self.idle_ttl
        });

        // leave room for the session about to be inserted
        let excess = (self.sessions.len() + 1).saturating_sub(self.max_sessions);
        if excess > 0 {
            let mut idle: Vec<(Instant, String)> = self
                .sessions
                .iter()
                .filter(|entry| !entry.session.busy)
                .map(|entry| (entry.touched, entry.key().clone()))
                .collect();
            idle.sort();
            for (_, id) in idle.into_iter().take(excess) {
                self.sessions.remove(&id);
            }
        }

        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "Evicted sessions");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn new_session_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().fold(String::with_capacity(32), |mut id, byte| {
        let _ = write!(id, "{byte:02x}");
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(FormState::with_defaults("/downloads", TransferOptions::default()))
    }

    #[test]
    fn test_create_assigns_distinct_hex_ids() {
        let store = store();
        let (a, session) = store.create();
        let (b, _) = store.create();

        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(session.form.directory, PathBuf::from("/downloads"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_update_persists_changes() {
        let store = store();
        let (id, _) = store.create();

        store.update(&id, |session| session.form.url = "https://youtu.be/x".to_string());
        assert_eq!(store.get(&id).unwrap().form.url, "https://youtu.be/x");
        assert!(store.update("missing", |_| ()).is_none());
    }

    #[test]
    fn test_create_respects_session_cap() {
        let store = SessionStore::with_limits(
            FormState::with_defaults("/downloads", TransferOptions::default()),
            DEFAULT_SESSION_IDLE_TTL,
            8,
        );
        let (first, _) = store.create();
        for _ in 0..500 {
            store.create();
        }

        assert_eq!(store.len(), 8);
        assert!(store.get(&first).is_none(), "oldest session is evicted first");
    }

    #[test]
    fn test_create_evicts_idle_sessions_but_keeps_busy_ones() {
        let store = SessionStore::with_limits(
            FormState::with_defaults("/downloads", TransferOptions::default()),
            Duration::ZERO,
            DEFAULT_MAX_SESSIONS,
        );
        let (idle, _) = store.create();
        let (busy, _) = store.create();
        store.update(&busy, |session| session.busy = true);

        let (fresh, _) = store.create();

        assert!(store.get(&idle).is_none());
        assert!(store.get(&busy).is_some());
        assert!(store.get(&fresh).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_recent_activity_protects_session_from_cap_eviction() {
        let store = SessionStore::with_limits(
            FormState::with_defaults("/downloads", TransferOptions::default()),
            DEFAULT_SESSION_IDLE_TTL,
            2,
        );
        let (older, _) = store.create();
        std::thread::sleep(Duration::from_millis(5));
        let (newer, _) = store.create();
        std::thread::sleep(Duration::from_millis(5));
        store.update(&older, |_| ());

        store.create();

        assert!(store.get(&older).is_some());
        assert!(store.get(&newer).is_none());
    }

    #[test]
    fn test_catalog_for_matches_url() {
        let store = store();
        let (id, _) = store.create();
        store.update(&id, |session| {
            session.catalog = Some((
                "https://youtu.be/x".to_string(),
                crate::catalog::build_catalog(crate::catalog::VideoMetadata::default()),
            ));
        });

        let session = store.get(&id).unwrap();
        assert!(session.catalog_for("https://youtu.be/x").is_some());
        assert!(session.catalog_for("https://youtu.be/y").is_none());
    }
}
