//! Playback Controller - single-writer arbitration per scope
//!
//! Every `play()` mints a token. After the play engine returns, the result
//! only counts if the token stored for the key is still the one this call
//! minted; otherwise a newer call (or a reset) owns the key and the result is
//! discarded as `Cancelled`. No cancellation signal is sent into an in-flight
//! attempt: it runs to completion and, if it turns out stale, its media is
//! paused.
//!
//! ```text
//!   Idle ──play──▶ Pending ──verified──▶ Active
//!    ▲               │  │                  │
//!    │   blocked/    │  └──superseded──▶ (Cancelled, record dropped)
//!    └── failed ─────┘                     │
//!    └────────── reset / cancel ───────────┘
//! ```

use crate::{
    engine::{DeterministicPlayEngine, PlayReport},
    media::{ElementId, MediaHandle},
    types::{DeterministicPlayOptions, EngineOutcome, PlayOutcome, PlaybackScope, SessionKey, SessionState},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

/// Request to play one slot
#[derive(Clone)]
pub struct PlayRequest {
    pub scope: PlaybackScope,
    pub id: String,
    pub media: MediaHandle,
    pub options: DeterministicPlayOptions,
}

impl PlayRequest {
    pub fn new(key: SessionKey, media: MediaHandle) -> Self {
        Self {
            scope: key.scope,
            id: key.id,
            media,
            options: DeterministicPlayOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DeterministicPlayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.scope, self.id.clone())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidKey(format!("{}:", self.scope)));
        }
        if !(self.options.playback_rate > 0.0) {
            return Err(Error::config(format!(
                "playback rate must be positive, got {}",
                self.options.playback_rate
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayRequest")
            .field("key", &self.key())
            .field("element", &self.media.element_id())
            .field("options", &self.options)
            .finish()
    }
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { key: SessionKey, token: u64 },
    Activated { key: SessionKey, token: u64, muted_fallback: bool },
    /// Dropped in favour of a newer session
    Superseded { key: SessionKey, token: u64 },
    /// Back to idle after a failed attempt, reset or teardown
    Cleared { key: SessionKey, token: u64, outcome: Option<PlayOutcome> },
}

/// The controller's record of one play attempt
struct PlaybackSession {
    token: u64,
    media: MediaHandle,
    state: SessionState,
}

/// Flag a state change the session lifecycle does not allow
fn check_transition(key: &SessionKey, from: SessionState, to: SessionState) {
    if !from.can_transition_to(to) {
        warn!(%key, %from, %to, "Unexpected session transition");
        debug_assert!(false, "session {} moved {} -> {}", key, from, to);
    }
}

#[derive(Default)]
struct ControllerInner {
    sessions: HashMap<SessionKey, PlaybackSession>,
    last_token: u64,
}

impl ControllerInner {
    fn mint(&mut self) -> u64 {
        self.last_token += 1;
        self.last_token
    }

    fn owns_element(&self, element: ElementId) -> bool {
        self.sessions.values().any(|s| s.media.element_id() == element)
    }
}

/// Single authority over playback intent.
///
/// Construct one per top-level mount and share it by `Arc`; call
/// [`reset_all`](Self::reset_all) on unmount.
pub struct PlaybackController {
    inner: Mutex<ControllerInner>,
    engine: DeterministicPlayEngine,
    events: broadcast::Sender<SessionEvent>,
}

impl PlaybackController {
    pub fn new(engine: DeterministicPlayEngine) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(ControllerInner::default()),
            engine,
            events,
        }
    }

    pub fn engine(&self) -> &DeterministicPlayEngine {
        &self.engine
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Drop every session in `scope` except `keep`, pausing its media unless
    /// the element is also used by `keep_element` (pooled elements)
    fn cancel_scope(
        &self,
        inner: &mut ControllerInner,
        scope: PlaybackScope,
        keep: &SessionKey,
        keep_element: Option<ElementId>,
    ) {
        let losers: Vec<SessionKey> = inner
            .sessions
            .keys()
            .filter(|k| k.scope == scope && *k != keep)
            .cloned()
            .collect();

        for key in losers {
            if let Some(session) = inner.sessions.remove(&key) {
                check_transition(&key, session.state, SessionState::Idle);
                if Some(session.media.element_id()) != keep_element {
                    session.media.pause();
                }
                debug!(%key, token = session.token, "Session superseded");
                self.emit(SessionEvent::Superseded { key, token: session.token });
            }
        }
    }

    /// Arbitrated play. The last call initiated for a key decides its final
    /// state, whatever order the attempts complete in.
    #[instrument(skip(self, request), fields(key = %request.key()))]
    pub async fn play(&self, request: PlayRequest) -> Result<PlayOutcome> {
        request.validate()?;
        let key = request.key();
        let element = request.media.element_id();

        let token = {
            let mut inner = self.inner.lock().await;
            self.cancel_scope(&mut inner, key.scope, &key, Some(element));

            let token = inner.mint();
            let previous = inner.sessions.insert(
                key.clone(),
                PlaybackSession {
                    token,
                    media: Arc::clone(&request.media),
                    state: SessionState::Pending,
                },
            );
            let from = previous.as_ref().map_or(SessionState::Idle, |p| p.state);
            check_transition(&key, from, SessionState::Pending);
            if let Some(previous) = previous {
                if previous.media.element_id() != element {
                    previous.media.pause();
                }
                self.emit(SessionEvent::Superseded {
                    key: key.clone(),
                    token: previous.token,
                });
            }

            debug!(token, "Session started");
            self.emit(SessionEvent::Started { key: key.clone(), token });
            token
        };

        let report = self
            .engine
            .attempt_detailed(request.media.as_ref(), &request.options)
            .await;

        self.settle(key, token, &request.media, report).await
    }

    async fn settle(
        &self,
        key: SessionKey,
        token: u64,
        media: &MediaHandle,
        report: PlayReport,
    ) -> Result<PlayOutcome> {
        let mut inner = self.inner.lock().await;

        let current = inner.sessions.get(&key).map(|s| s.token) == Some(token);
        if !current {
            // Undo a transient play unless a live session now drives the element
            if report.outcome == EngineOutcome::Playing && !inner.owns_element(media.element_id()) {
                media.pause();
            }
            info!(%key, token, outcome = ?report.outcome, "Stale play result discarded");
            return Ok(PlayOutcome::Cancelled);
        }

        match report.outcome {
            EngineOutcome::Playing => {
                if let Some(session) = inner.sessions.get_mut(&key) {
                    check_transition(&key, session.state, SessionState::Active);
                    session.state = SessionState::Active;
                }
                info!(%key, token, muted_fallback = report.muted_fallback, "Session active");
                self.emit(SessionEvent::Activated {
                    key,
                    token,
                    muted_fallback: report.muted_fallback,
                });
                Ok(PlayOutcome::Playing)
            }
            outcome => {
                if let Some(session) = inner.sessions.remove(&key) {
                    check_transition(&key, session.state, SessionState::Idle);
                }
                let outcome = PlayOutcome::from(outcome);
                info!(%key, token, %outcome, "Session cleared");
                self.emit(SessionEvent::Cleared {
                    key,
                    token,
                    outcome: Some(outcome),
                });
                Ok(outcome)
            }
        }
    }

    /// Pause the slot's media and return it to idle. Returns whether a
    /// session existed.
    #[instrument(skip(self))]
    pub async fn reset(&self, scope: PlaybackScope, id: &str) -> bool {
        let key = SessionKey::new(scope, id);
        let mut inner = self.inner.lock().await;

        match inner.sessions.remove(&key) {
            Some(session) => {
                check_transition(&key, session.state, SessionState::Idle);
                session.media.pause();
                info!(%key, token = session.token, "Session reset");
                self.emit(SessionEvent::Cleared {
                    key,
                    token: session.token,
                    outcome: None,
                });
                true
            }
            None => false,
        }
    }

    /// Stop every other session in the key's scope without waiting for their
    /// in-flight attempts
    #[instrument(skip(self))]
    pub async fn cancel_all_except(&self, key: &SessionKey) {
        let mut inner = self.inner.lock().await;
        let keep_element = inner.sessions.get(key).map(|s| s.media.element_id());
        self.cancel_scope(&mut inner, key.scope, key, keep_element);
    }

    /// Clear every session in every scope
    #[instrument(skip(self))]
    pub async fn reset_all(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.sessions.len();

        for (key, session) in inner.sessions.drain() {
            check_transition(&key, session.state, SessionState::Idle);
            session.media.pause();
            self.emit(SessionEvent::Cleared {
                key,
                token: session.token,
                outcome: None,
            });
        }

        info!(count, "All sessions reset");
    }

    pub async fn state(&self, key: &SessionKey) -> SessionState {
        self.inner
            .lock()
            .await
            .sessions
            .get(key)
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// The active session of a scope, if any
    pub async fn active_in(&self, scope: PlaybackScope) -> Option<SessionKey> {
        self.inner
            .lock()
            .await
            .sessions
            .iter()
            .find(|(k, s)| k.scope == scope && s.state == SessionState::Active)
            .map(|(k, _)| k.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(DeterministicPlayEngine::default())
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
