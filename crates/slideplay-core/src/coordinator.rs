//! Playback coordinator
//!
//! Glues the source cache and the controller along the UI data flow:
//! slide change → attach source → arbitrated play → outcome. The cache alone
//! binds sources, the controller alone drives play/pause.

use crate::{
    cache::SourceCache,
    config::ArbiterConfig,
    controller::{PlayRequest, PlaybackController},
    engine::DeterministicPlayEngine,
    media::{MediaElement, MediaErrorKind, SignalProvider, StreamEngine},
    resolver::SourceResolver,
    types::{MediaSource, PlayOutcome, SessionKey},
    Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What the UI should offer for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    None,
    /// Tap to play
    PlayButton,
    /// Explicit retry after a decode or network error
    Retry,
}

impl Affordance {
    /// Map a play outcome to its affordance. Only media errors get a retry.
    pub fn for_outcome(outcome: PlayOutcome) -> Self {
        match outcome {
            PlayOutcome::Playing | PlayOutcome::Cancelled => Affordance::None,
            PlayOutcome::Blocked | PlayOutcome::Failed => Affordance::PlayButton,
        }
    }
}

/// Cache and controller wired together for one mount
#[derive(Debug, Clone)]
pub struct PlaybackCoordinator {
    cache: Arc<SourceCache>,
    controller: Arc<PlaybackController>,
}

impl PlaybackCoordinator {
    pub fn new(cache: Arc<SourceCache>, controller: Arc<PlaybackController>) -> Self {
        Self { cache, controller }
    }

    /// Build the full stack from configuration
    pub fn from_config(
        config: &ArbiterConfig,
        signals: Arc<dyn SignalProvider>,
        streams: Arc<dyn StreamEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(SourceResolver::new(config.resolver.clone(), signals));
        let cache = Arc::new(SourceCache::new(config.cache.clone(), resolver, streams));
        let engine = DeterministicPlayEngine::new(config.engine.clone());
        let controller = Arc::new(PlaybackController::new(engine));

        Ok(Self::new(cache, controller))
    }

    pub fn cache(&self) -> &Arc<SourceCache> {
        &self.cache
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    /// Bind the slot's source and play it
    #[instrument(skip(self, request, src), fields(key = %request.key()))]
    pub async fn activate(&self, request: PlayRequest, src: &MediaSource) -> Result<PlayOutcome> {
        let key = request.key();
        self.cache.attach(request.media.as_ref(), &key, src).await?;
        let outcome = self.controller.play(request).await?;
        if outcome.is_user_visible_failure() {
            warn!(%key, "Playback failed, offering manual play");
        }
        Ok(outcome)
    }

    /// Stop the slot and give its source reference back
    #[instrument(skip(self, media))]
    pub async fn deactivate(&self, key: &SessionKey, media: Option<&dyn MediaElement>) {
        self.controller.reset(key.scope, &key.id).await;
        self.cache.detach(key, media).await;
    }

    /// User-triggered retry: tear down the decode pipeline and start over
    #[instrument(skip(self, request, src), fields(key = %request.key()))]
    pub async fn retry(&self, request: PlayRequest, src: &MediaSource) -> Result<PlayOutcome> {
        let key = request.key();

        self.cache.reset(&key).await;
        self.controller.reset(key.scope, &key.id).await;

        self.cache.attach(request.media.as_ref(), &key, src).await?;
        request.media.load();

        info!(%key, "Retrying with a fresh source");
        let outcome = self.controller.play(request).await?;
        if outcome.is_user_visible_failure() {
            warn!(%key, "Retry failed");
        }
        Ok(outcome)
    }

    /// Report a media error event for an active slot. The session is
    /// stopped and never retried automatically.
    #[instrument(skip(self))]
    pub async fn on_media_error(&self, key: &SessionKey, kind: MediaErrorKind) -> Affordance {
        warn!(%key, ?kind, "Media error, waiting for user retry");
        self.controller.reset(key.scope, &key.id).await;
        Affordance::Retry
    }

    /// Prime the sources around the current slide. Failures are logged and
    /// skipped. Returns how many neighbours were primed.
    pub async fn preload_neighbors(&self, neighbors: &[(SessionKey, MediaSource)]) -> usize {
        let mut primed = 0;
        for (key, src) in neighbors {
            match self.cache.preload(key, src).await {
                Ok(()) => primed += 1,
                Err(e) => warn!(%key, error = %e, "Neighbour preload skipped"),
            }
        }
        primed
    }

    /// Full teardown on unmount
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.controller.reset_all().await;
        self.cache.clear().await;
        info!("Playback coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StaticSignals;
    use crate::sim::{SimMedia, SimMediaConfig, SimStreamEngine};
    use crate::types::{PlaybackScope, SessionState};

    fn coordinator(engine: SimStreamEngine) -> PlaybackCoordinator {
        PlaybackCoordinator::from_config(
            &ArbiterConfig::default(),
            Arc::new(StaticSignals::default()),
            Arc::new(engine),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_binds_and_plays() {
        let coordinator = coordinator(SimStreamEngine::new());
        let media = SimMedia::new();
        let key = SessionKey::carousel("1");

        let outcome = coordinator
            .activate(PlayRequest::new(key.clone(), Arc::new(media.clone())), &"https://cdn/1.mp4".into())
            .await
            .unwrap();

        assert_eq!(outcome, PlayOutcome::Playing);
        assert_eq!(media.src().as_deref(), Some("https://cdn/1.mp4"));
        assert_eq!(coordinator.cache().entry_info(&key).await.unwrap().ref_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_releases_viewer() {
        let coordinator = coordinator(SimStreamEngine::new());
        let media = SimMedia::new();
        let key = SessionKey::viewer("1");

        coordinator
            .activate(PlayRequest::new(key.clone(), Arc::new(media.clone())), &"https://cdn/1.mp4".into())
            .await
            .unwrap();
        coordinator.deactivate(&key, Some(&media)).await;

        assert!(media.is_paused());
        assert_eq!(media.src(), None);
        assert_eq!(coordinator.controller().state(&key).await, SessionState::Idle);
        assert_eq!(coordinator.cache().entry_info(&key).await.unwrap().ref_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rebuilds_stream() {
        let engine = SimStreamEngine::new();
        let stats = engine.stats();
        let coordinator = coordinator(engine);
        let media = SimMedia::new();
        let key = SessionKey::viewer("hls");
        let src: MediaSource = "https://cdn/master.m3u8".into();

        coordinator
            .activate(PlayRequest::new(key.clone(), Arc::new(media.clone())), &src)
            .await
            .unwrap();
        assert_eq!(coordinator.on_media_error(&key, MediaErrorKind::Decode).await, Affordance::Retry);
        assert_eq!(coordinator.controller().state(&key).await, SessionState::Idle);

        let outcome = coordinator
            .retry(PlayRequest::new(key.clone(), Arc::new(media.clone())), &src)
            .await
            .unwrap();

        assert_eq!(outcome, PlayOutcome::Playing);
        assert_eq!(stats.created(), 2);
        assert_eq!(stats.destroys(), 1);
        assert_eq!(media.load_calls(), 1);
        assert_eq!(coordinator.cache().entry_info(&key).await.unwrap().ref_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_neighbors_skips_unresolvable() {
        let coordinator = coordinator(SimStreamEngine::new());
        let neighbors = vec![
            (SessionKey::carousel("2"), MediaSource::from("https://cdn/2.mp4")),
            (SessionKey::carousel("3"), MediaSource::Variants(Default::default())),
        ];

        assert_eq!(coordinator.preload_neighbors(&neighbors).await, 1);
        let info = coordinator.cache().entry_info(&SessionKey::carousel("2")).await.unwrap();
        assert_eq!(info.ref_count, 0);
        assert!(info.disposal_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_everything() {
        let coordinator = coordinator(SimStreamEngine::new());
        let media = SimMedia::new();
        let key = SessionKey::carousel("1");

        coordinator
            .activate(PlayRequest::new(key.clone(), Arc::new(media.clone())), &"https://cdn/1.mp4".into())
            .await
            .unwrap();
        coordinator.shutdown().await;

        assert!(media.is_paused());
        assert_eq!(coordinator.controller().active_in(PlaybackScope::Carousel).await, None);
        assert_eq!(coordinator.cache().stats().await.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_activation_is_a_visible_failure() {
        let coordinator = coordinator(SimStreamEngine::new());
        let media = SimMedia::with_config(SimMediaConfig {
            stalls: true,
            ..Default::default()
        });
        let key = SessionKey::viewer("1");

        let outcome = coordinator
            .activate(PlayRequest::new(key.clone(), Arc::new(media.clone())), &"https://cdn/1.mp4".into())
            .await
            .unwrap();

        assert!(outcome.is_user_visible_failure());
        assert_eq!(Affordance::for_outcome(outcome), Affordance::PlayButton);
        assert_eq!(coordinator.controller().state(&key).await, SessionState::Idle);
        // The slot keeps its source for the manual play
        assert_eq!(coordinator.cache().entry_info(&key).await.unwrap().ref_count, 1);
    }

    #[test]
    fn test_affordances() {
        assert_eq!(Affordance::for_outcome(PlayOutcome::Cancelled), Affordance::None);
        assert_eq!(Affordance::for_outcome(PlayOutcome::Blocked), Affordance::PlayButton);
        assert_eq!(Affordance::for_outcome(PlayOutcome::Failed), Affordance::PlayButton);
    }
}
