//! Platform guards for browsers with a non-standard media lifecycle
//!
//! iOS Safari can leave media in an inconsistent state across visibility
//! loss, page hide and orientation changes, and refuses unmuted playback
//! until a user gesture has primed audio once. The guard resets the
//! foreground sessions through the controller when the page goes away and
//! replays them through the controller when it comes back.

use crate::{
    controller::{PlayRequest, PlaybackController},
    media::PlayRejection,
    types::{PlayOutcome, PlaybackScope, SessionKey},
    Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Browser platform family, as far as media quirks are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// Any browser on iOS / iPadOS (all of them run WebKit)
    Ios,
    Android,
    Desktop,
}

impl Platform {
    /// Classify a user agent string
    pub fn detect(user_agent: &str) -> Self {
        const IOS_MARKERS: [&str; 3] = ["iPhone", "iPad", "iPod"];

        if IOS_MARKERS.iter().any(|m| user_agent.contains(m)) {
            Platform::Ios
        } else if user_agent.contains("Android") {
            Platform::Android
        } else {
            Platform::Desktop
        }
    }

    /// Whether lifecycle events must reset and replay sessions
    pub fn needs_lifecycle_guard(&self) -> bool {
        matches!(self, Platform::Ios)
    }

    /// Whether unmuted playback needs a one-time gesture unlock
    pub fn needs_audio_unlock(&self) -> bool {
        matches!(self, Platform::Ios)
    }
}

/// Page lifecycle notifications forwarded by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    VisibilityHidden,
    VisibilityVisible,
    PageHide,
    PageShow,
    OrientationChange,
}

/// Plays a short silent clip inside a user gesture
#[async_trait]
pub trait AudioUnlocker: Send + Sync {
    async fn prime(&self) -> std::result::Result<(), PlayRejection>;
}

/// One-shot, process-wide audio unlock latch
#[derive(Debug, Default)]
pub struct UnlockLatch {
    unlocked: AtomicBool,
    priming: Mutex<()>,
}

static GLOBAL_LATCH: OnceLock<Arc<UnlockLatch>> = OnceLock::new();

impl UnlockLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latch shared by the whole process
    pub fn global() -> Arc<UnlockLatch> {
        Arc::clone(GLOBAL_LATCH.get_or_init(|| Arc::new(UnlockLatch::new())))
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    /// Prime audio once. Later calls return immediately without touching
    /// the unlocker; a failed prime leaves the latch closed for the next
    /// gesture.
    pub async fn unlock(&self, unlocker: &dyn AudioUnlocker) -> bool {
        if self.is_unlocked() {
            return true;
        }

        let _priming = self.priming.lock().await;
        if self.is_unlocked() {
            return true;
        }

        match unlocker.prime().await {
            Ok(()) => {
                self.unlocked.store(true, Ordering::Release);
                info!("Audio unlocked");
                true
            }
            Err(rejection) => {
                warn!(%rejection, "Audio unlock failed");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct GuardState {
    /// Foreground request per scope, replayed after the page returns
    foreground: BTreeMap<PlaybackScope, PlayRequest>,
    hidden: bool,
    /// Sessions reset while hidden and not yet replayed
    suspended: bool,
}

/// Lifecycle guard routing every reset and replay through the controller
pub struct PlatformGuard {
    platform: Platform,
    controller: Arc<PlaybackController>,
    latch: Arc<UnlockLatch>,
    state: Mutex<GuardState>,
}

impl PlatformGuard {
    pub fn new(platform: Platform, controller: Arc<PlaybackController>) -> Self {
        Self::with_latch(platform, controller, UnlockLatch::global())
    }

    pub fn with_latch(
        platform: Platform,
        controller: Arc<PlaybackController>,
        latch: Arc<UnlockLatch>,
    ) -> Self {
        Self {
            platform,
            controller,
            latch,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Whether unmuted playback would currently be refused
    pub fn requires_unlock(&self) -> bool {
        self.platform.needs_audio_unlock() && !self.latch.is_unlocked()
    }

    /// Forward a user gesture so the platform can unlock audio
    pub async fn on_user_gesture(&self, unlocker: &dyn AudioUnlocker) -> bool {
        if !self.platform.needs_audio_unlock() {
            return true;
        }
        self.latch.unlock(unlocker).await
    }

    fn prepare(&self, mut request: PlayRequest) -> PlayRequest {
        if self.requires_unlock() && !request.options.muted {
            debug!(key = %request.key(), "Audio locked, starting muted");
            request.options.muted = true;
        }
        request
    }

    /// Play through the controller and remember the request as the scope's
    /// foreground slot.
    ///
    /// While the page is hidden the request is only recorded and this returns
    /// `PlayOutcome::Cancelled` without touching the media. Its real outcome
    /// is reported by [`handle`](Self::handle) when the page comes back.
    /// Invalid requests are rejected before they are recorded.
    #[instrument(skip(self, request), fields(key = %request.key()))]
    pub async fn play(&self, request: PlayRequest) -> Result<PlayOutcome> {
        request.validate()?;
        let request = self.prepare(request);
        let key = request.key();
        {
            let mut state = self.state.lock().await;
            state.foreground.insert(request.scope, request.clone());
            if state.hidden {
                // Replayed when the page comes back
                debug!("Page hidden, deferring play");
                state.suspended = true;
                return Ok(PlayOutcome::Cancelled);
            }
        }

        let result = self.controller.play(request).await;
        if result.is_err() {
            self.release(&key).await;
        }
        result
    }

    /// Forget the foreground slot of `key`'s scope if it is `key`
    pub async fn release(&self, key: &SessionKey) {
        let mut state = self.state.lock().await;
        if state.foreground.get(&key.scope).is_some_and(|r| r.id == key.id) {
            state.foreground.remove(&key.scope);
        }
    }

    /// React to a lifecycle event. Returns the outcomes of replayed sessions.
    #[instrument(skip(self))]
    pub async fn handle(&self, event: LifecycleEvent) -> Vec<(SessionKey, PlayOutcome)> {
        if !self.platform.needs_lifecycle_guard() {
            return Vec::new();
        }

        match event {
            LifecycleEvent::VisibilityHidden | LifecycleEvent::PageHide => {
                self.suspend(true).await;
                Vec::new()
            }
            LifecycleEvent::OrientationChange => {
                let hidden = self.suspend(false).await;
                if hidden {
                    Vec::new()
                } else {
                    self.resume().await
                }
            }
            LifecycleEvent::VisibilityVisible | LifecycleEvent::PageShow => self.resume().await,
        }
    }

    /// Reset every foreground session. Returns whether the page is hidden.
    async fn suspend(&self, hide: bool) -> bool {
        let mut state = self.state.lock().await;
        state.hidden |= hide;

        for request in state.foreground.values() {
            self.controller.reset(request.scope, &request.id).await;
        }
        if !state.foreground.is_empty() {
            state.suspended = true;
        }

        info!(sessions = state.foreground.len(), hidden = state.hidden, "Sessions suspended");
        state.hidden
    }

    /// Replay the foreground sessions. A failing slot is skipped so the
    /// other scopes still come back.
    async fn resume(&self) -> Vec<(SessionKey, PlayOutcome)> {
        let requests: Vec<PlayRequest> = {
            let mut state = self.state.lock().await;
            state.hidden = false;
            if !std::mem::take(&mut state.suspended) {
                return Vec::new();
            }
            state.foreground.values().cloned().collect()
        };

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let request = self.prepare(request);
            let key = request.key();
            match self.controller.play(request).await {
                Ok(outcome) => outcomes.push((key, outcome)),
                Err(e) => warn!(%key, error = %e, "Replay skipped"),
            }
        }

        info!(sessions = outcomes.len(), "Sessions replayed");
        outcomes
    }
}

impl std::fmt::Debug for PlatformGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformGuard")
            .field("platform", &self.platform)
            .field("unlocked", &self.latch.is_unlocked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaElement;
    use crate::sim::{AutoplayPolicy, SimMedia};
    use crate::types::SessionState;
    use std::sync::atomic::AtomicUsize;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36";

    #[derive(Default)]
    struct CountingUnlocker {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl AudioUnlocker for CountingUnlocker {
        async fn prime(&self) -> std::result::Result<(), PlayRejection> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                Err(PlayRejection::NotAllowed)
            } else {
                Ok(())
            }
        }
    }

    fn guard(platform: Platform) -> (PlatformGuard, Arc<PlaybackController>) {
        let controller = Arc::new(PlaybackController::default());
        let guard = PlatformGuard::with_latch(platform, Arc::clone(&controller), Arc::new(UnlockLatch::new()));
        (guard, controller)
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(Platform::detect(IPHONE), Platform::Ios);
        assert_eq!(Platform::detect(PIXEL), Platform::Android);
        assert_eq!(Platform::detect("Mozilla/5.0 (X11; Linux x86_64)"), Platform::Desktop);
        assert!(Platform::Ios.needs_lifecycle_guard());
        assert!(!Platform::Android.needs_audio_unlock());
    }

    #[tokio::test]
    async fn test_unlock_latch_is_one_shot() {
        let latch = UnlockLatch::new();
        let unlocker = CountingUnlocker::default();

        assert!(latch.unlock(&unlocker).await);
        assert!(latch.unlock(&unlocker).await);
        assert_eq!(unlocker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_unlock_retries_on_next_gesture() {
        let latch = UnlockLatch::new();
        let unlocker = CountingUnlocker {
            fail_first: true,
            ..Default::default()
        };

        assert!(!latch.unlock(&unlocker).await);
        assert!(!latch.is_unlocked());
        assert!(latch.unlock(&unlocker).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_resets_and_visible_replays() {
        let (guard, controller) = guard(Platform::Ios);
        guard.on_user_gesture(&CountingUnlocker::default()).await;
        let media = SimMedia::new();
        let key = SessionKey::viewer("x");

        let outcome = guard.play(PlayRequest::new(key.clone(), Arc::new(media.clone()))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);

        guard.handle(LifecycleEvent::VisibilityHidden).await;
        assert!(media.is_paused());
        assert_eq!(controller.state(&key).await, SessionState::Idle);

        let replayed = guard.handle(LifecycleEvent::VisibilityVisible).await;
        assert_eq!(replayed, vec![(key.clone(), PlayOutcome::Playing)]);
        assert_eq!(controller.state(&key).await, SessionState::Active);
        assert!(!media.muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_orientation_change_replays_immediately() {
        let (guard, controller) = guard(Platform::Ios);
        let media = SimMedia::new();
        let key = SessionKey::carousel("1");

        guard.play(PlayRequest::new(key.clone(), Arc::new(media.clone()))).await.unwrap();
        let replayed = guard.handle(LifecycleEvent::OrientationChange).await;

        assert_eq!(replayed, vec![(key.clone(), PlayOutcome::Playing)]);
        assert_eq!(controller.state(&key).await, SessionState::Active);
        assert!(media.pause_calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_audio_starts_muted() {
        let (guard, _controller) = guard(Platform::Ios);
        let media = SimMedia::with_policy(AutoplayPolicy::MutedOnly);

        assert!(guard.requires_unlock());
        let outcome = guard
            .play(PlayRequest::new(SessionKey::viewer("x"), Arc::new(media.clone())))
            .await
            .unwrap();

        assert_eq!(outcome, PlayOutcome::Playing);
        assert!(media.muted());
        // No refused unmuted attempt first
        assert_eq!(media.play_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_while_hidden_is_deferred() {
        let (guard, controller) = guard(Platform::Ios);
        let media = SimMedia::new();
        let key = SessionKey::viewer("x");

        guard.handle(LifecycleEvent::PageHide).await;
        let outcome = guard.play(PlayRequest::new(key.clone(), Arc::new(media.clone()))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Cancelled);
        assert_eq!(media.play_calls(), 0);

        let replayed = guard.handle(LifecycleEvent::PageShow).await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(controller.state(&key).await, SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_is_not_replayed() {
        let (guard, controller) = guard(Platform::Ios);
        let tile = SimMedia::new();
        let media = SimMedia::new();
        let key = SessionKey::viewer("x");

        let err = guard
            .play(PlayRequest::new(SessionKey::carousel(""), Arc::new(tile.clone())))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_KEY");
        assert_eq!(tile.play_calls(), 0);

        let outcome = guard.play(PlayRequest::new(key.clone(), Arc::new(media.clone()))).await.unwrap();
        assert_eq!(outcome, PlayOutcome::Playing);

        guard.handle(LifecycleEvent::VisibilityHidden).await;
        let replayed = guard.handle(LifecycleEvent::VisibilityVisible).await;

        assert_eq!(replayed, vec![(key.clone(), PlayOutcome::Playing)]);
        assert_eq!(controller.state(&key).await, SessionState::Active);
        assert_eq!(tile.play_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_ignores_lifecycle() {
        let (guard, controller) = guard(Platform::Desktop);
        let media = SimMedia::new();
        let key = SessionKey::viewer("x");

        guard.play(PlayRequest::new(key.clone(), Arc::new(media.clone()))).await.unwrap();
        guard.handle(LifecycleEvent::VisibilityHidden).await;

        assert!(!media.is_paused());
        assert_eq!(controller.state(&key).await, SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_slot_is_not_replayed() {
        let (guard, _controller) = guard(Platform::Ios);
        let key = SessionKey::viewer("x");

        guard
            .play(PlayRequest::new(key.clone(), Arc::new(SimMedia::new())))
            .await
            .unwrap();
        guard.release(&key).await;

        guard.handle(LifecycleEvent::VisibilityHidden).await;
        let replayed = guard.handle(LifecycleEvent::VisibilityVisible).await;
        assert!(replayed.is_empty());
    }
}
