//! Deterministic Play Engine
//!
//! A play request is only reported as `Playing` once real progress has been
//! observed. Platforms may accept `play()` and then never present a frame;
//! that case is reported as `Failed`.
//!
//! Sequence:
//! 1. apply muted / playbackRate
//! 2. bounded wait for playable data
//! 3. play, then verify progress within the verify window
//! 4. on policy denial, optionally retry once muted

use crate::{
    config::EngineConfig,
    media::{MediaElement, MediaEvent},
    types::{DeterministicPlayOptions, EngineOutcome},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

/// Signal used to confirm playback progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressSignal {
    /// Presented-frame callback (exact)
    FrameCallback,
    /// Two currentTime samples (heuristic)
    TimeSampling,
    /// Verification never ran
    None,
}

/// Detailed result of a deterministic play attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayReport {
    pub outcome: EngineOutcome,
    /// Playback only succeeded after forcing `muted = true`
    pub muted_fallback: bool,
    pub signal: ProgressSignal,
}

impl PlayReport {
    fn new(outcome: EngineOutcome) -> Self {
        Self {
            outcome,
            muted_fallback: false,
            signal: ProgressSignal::None,
        }
    }
}

/// Confirms that an accepted play request actually advances
#[async_trait]
pub trait ProgressProbe: Send + Sync {
    fn signal(&self) -> ProgressSignal;

    /// True once progress is observed; false when the window elapses first
    async fn verify(&self, media: &dyn MediaElement, window: Duration) -> bool;
}

/// Waits for the presented-frame counter to advance
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCallbackProbe;

#[async_trait]
impl ProgressProbe for FrameCallbackProbe {
    fn signal(&self) -> ProgressSignal {
        ProgressSignal::FrameCallback
    }

    async fn verify(&self, media: &dyn MediaElement, window: Duration) -> bool {
        let Some(mut frames) = media.frame_counter() else {
            return false;
        };
        let start = *frames.borrow_and_update();

        let advanced = async {
            loop {
                if frames.changed().await.is_err() {
                    return false;
                }
                if *frames.borrow() > start {
                    return true;
                }
            }
        };

        tokio::time::timeout(window, advanced).await.unwrap_or(false)
    }
}

/// Samples currentTime after a short and then a longer delay
#[derive(Debug, Clone, Copy)]
pub struct SamplingProbe {
    pub short: Duration,
    pub long: Duration,
    pub min_advance_secs: f64,
}

impl SamplingProbe {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            short: Duration::from_millis(config.short_sample_ms),
            long: Duration::from_millis(config.long_sample_ms),
            min_advance_secs: config.min_advance_secs,
        }
    }
}

impl Default for SamplingProbe {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[async_trait]
impl ProgressProbe for SamplingProbe {
    fn signal(&self) -> ProgressSignal {
        ProgressSignal::TimeSampling
    }

    async fn verify(&self, media: &dyn MediaElement, window: Duration) -> bool {
        let short = self.short.min(window);
        let long = self.long.min(window).max(short);
        let start = media.current_time();

        tokio::time::sleep(short).await;
        let first = media.current_time();
        debug!(start, first, "Progress sample");
        if first - start >= self.min_advance_secs {
            return true;
        }

        tokio::time::sleep(long - short).await;
        let second = media.current_time();
        debug!(start, second, "Progress sample");
        second - start >= self.min_advance_secs && second >= first
    }
}

/// How the engine picks a progress probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStrategy {
    /// Frame callbacks when the element exposes them, else sampling
    #[default]
    Auto,
    FrameCallback,
    Sampling,
}

/// Deterministic play engine
#[derive(Debug, Clone)]
pub struct DeterministicPlayEngine {
    config: EngineConfig,
    strategy: ProbeStrategy,
    frame: FrameCallbackProbe,
    sampling: SamplingProbe,
}

impl DeterministicPlayEngine {
    pub fn new(config: EngineConfig) -> Self {
        let strategy = config.probe;
        Self {
            sampling: SamplingProbe::from_config(&config),
            config,
            strategy: ProbeStrategy::Auto,
            frame: FrameCallbackProbe,
        }
        .with_strategy(strategy)
    }

    pub fn with_strategy(mut self, strategy: ProbeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn probe_for(&self, media: &dyn MediaElement) -> &dyn ProgressProbe {
        match self.strategy {
            ProbeStrategy::Sampling => &self.sampling,
            ProbeStrategy::Auto | ProbeStrategy::FrameCallback
                if media.frame_counter().is_some() =>
            {
                &self.frame
            }
            _ => &self.sampling,
        }
    }

    /// Attempt playback and classify the outcome
    pub async fn attempt(
        &self,
        media: &dyn MediaElement,
        opts: &DeterministicPlayOptions,
    ) -> EngineOutcome {
        self.attempt_detailed(media, opts).await.outcome
    }

    /// Attempt playback, also reporting muted fallback and the probe used
    #[instrument(skip(self, media), fields(element = %media.element_id()))]
    pub async fn attempt_detailed(
        &self,
        media: &dyn MediaElement,
        opts: &DeterministicPlayOptions,
    ) -> PlayReport {
        media.set_muted(opts.muted);
        media.set_playback_rate(opts.playback_rate);

        if !self.wait_until_ready(media).await {
            return PlayReport::new(EngineOutcome::Failed);
        }

        let window = Duration::from_millis(opts.verify_window_ms);
        let probe = self.probe_for(media);

        match media.play().await {
            Ok(()) => {
                let outcome = self.verify_or_pause(media, probe, window, EngineOutcome::Failed).await;
                PlayReport {
                    outcome,
                    muted_fallback: false,
                    signal: probe.signal(),
                }
            }
            Err(rejection) if rejection.is_policy_denial() => {
                if !opts.allow_auto_mute {
                    debug!("Autoplay refused, muted retry disabled");
                    return PlayReport::new(EngineOutcome::Blocked);
                }
                self.retry_muted(media, probe, window).await
            }
            Err(rejection) => {
                warn!(%rejection, "Play request failed");
                PlayReport::new(EngineOutcome::Failed)
            }
        }
    }

    async fn retry_muted(
        &self,
        media: &dyn MediaElement,
        probe: &dyn ProgressProbe,
        window: Duration,
    ) -> PlayReport {
        info!("Autoplay refused, retrying muted");
        media.set_muted(true);

        match media.play().await {
            Ok(()) => {
                let outcome = self.verify_or_pause(media, probe, window, EngineOutcome::Blocked).await;
                PlayReport {
                    outcome,
                    muted_fallback: outcome == EngineOutcome::Playing,
                    signal: probe.signal(),
                }
            }
            Err(rejection) => {
                debug!(%rejection, "Muted retry refused");
                PlayReport::new(EngineOutcome::Blocked)
            }
        }
    }

    async fn verify_or_pause(
        &self,
        media: &dyn MediaElement,
        probe: &dyn ProgressProbe,
        window: Duration,
        on_stall: EngineOutcome,
    ) -> EngineOutcome {
        if probe.verify(media, window).await {
            debug!(signal = ?probe.signal(), "Progress verified");
            EngineOutcome::Playing
        } else {
            warn!(signal = ?probe.signal(), "Play accepted but no progress, pausing");
            media.pause();
            on_stall
        }
    }

    /// Bounded wait for readyState >= HAVE_CURRENT_DATA
    async fn wait_until_ready(&self, media: &dyn MediaElement) -> bool {
        // Subscribe before checking so an event between the two is not lost
        let mut events = media.subscribe();
        if media.ready_state().can_attempt_play() {
            return true;
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(MediaEvent::CanPlay | MediaEvent::LoadedData) => return true,
                    Ok(MediaEvent::Error(kind)) => {
                        warn!(?kind, "Media error while waiting for data");
                        return false;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if media.ready_state().can_attempt_play() {
                            return true;
                        }
                    }
                    Err(RecvError::Closed) => return media.ready_state().can_attempt_play(),
                }
            }
        };

        match tokio::time::timeout(self.config.ready_timeout(), wait).await {
            Ok(ready) => ready,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.ready_timeout_ms,
                    ready_state = ?media.ready_state(),
                    "Media not ready in time"
                );
                false
            }
        }
    }
}

impl Default for DeterministicPlayEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Free-function form of [`DeterministicPlayEngine::attempt`] with default timing
pub async fn attempt_deterministic_play(
    media: &dyn MediaElement,
    opts: &DeterministicPlayOptions,
) -> EngineOutcome {
    DeterministicPlayEngine::default().attempt(media, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaErrorKind, PlayRejection, ReadyState};
    use crate::sim::{AutoplayPolicy, PlayScript, SimMedia, SimMediaConfig};

    #[tokio::test(start_paused = true)]
    async fn test_plays_when_allowed() {
        let media = SimMedia::new();
        let report = DeterministicPlayEngine::default()
            .attempt_detailed(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(report.outcome, EngineOutcome::Playing);
        assert!(!report.muted_fallback);
        assert_eq!(report.signal, ProgressSignal::TimeSampling);
        assert!(!media.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_fallback() {
        let media = SimMedia::with_policy(AutoplayPolicy::MutedOnly);
        let opts = DeterministicPlayOptions::default().with_auto_mute(true);

        let report = DeterministicPlayEngine::default().attempt_detailed(&media, &opts).await;

        assert_eq!(report.outcome, EngineOutcome::Playing);
        assert!(report.muted_fallback);
        assert!(media.muted());
        assert_eq!(media.play_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_without_auto_mute() {
        let media = SimMedia::with_policy(AutoplayPolicy::MutedOnly);
        let opts = DeterministicPlayOptions::default().with_auto_mute(false);

        let outcome = DeterministicPlayEngine::default().attempt(&media, &opts).await;

        assert_eq!(outcome, EngineOutcome::Blocked);
        assert!(!media.muted());
        assert_eq!(media.play_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_when_muted_retry_refused() {
        let media = SimMedia::with_policy(AutoplayPolicy::Denied);
        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(outcome, EngineOutcome::Blocked);
        assert_eq!(media.play_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_retry_that_stalls_is_blocked() {
        let media = SimMedia::new();
        media.push_script(PlayScript::Reject(PlayRejection::NotAllowed));
        media.push_script(PlayScript::Accept { progress: false });

        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(outcome, EngineOutcome::Blocked);
        assert!(media.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stall_is_failure() {
        let media = SimMedia::with_config(SimMediaConfig {
            stalls: true,
            ..Default::default()
        });
        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(outcome, EngineOutcome::Failed);
        assert!(media.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_policy_rejection_fails_without_retry() {
        let media = SimMedia::new();
        media.push_script(PlayScript::Reject(PlayRejection::NotSupported));

        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(outcome, EngineOutcome::Failed);
        assert_eq!(media.play_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_callback_probe_preferred() {
        let media = SimMedia::with_config(SimMediaConfig {
            frame_callbacks: true,
            ..Default::default()
        });
        let report = DeterministicPlayEngine::default()
            .attempt_detailed(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(report.outcome, EngineOutcome::Playing);
        assert_eq!(report.signal, ProgressSignal::FrameCallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_strategy_overrides_frame_callbacks() {
        let media = SimMedia::with_config(SimMediaConfig {
            frame_callbacks: true,
            ..Default::default()
        });
        let engine = DeterministicPlayEngine::default().with_strategy(ProbeStrategy::Sampling);
        let report = engine
            .attempt_detailed(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(report.outcome, EngineOutcome::Playing);
        assert_eq!(report.signal, ProgressSignal::TimeSampling);

        let configured = DeterministicPlayEngine::new(EngineConfig {
            probe: ProbeStrategy::Sampling,
            ..Default::default()
        });
        let report = configured
            .attempt_detailed(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(report.signal, ProgressSignal::TimeSampling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_probe_detects_stall() {
        let media = SimMedia::with_config(SimMediaConfig {
            frame_callbacks: true,
            stalls: true,
            ..Default::default()
        });
        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(outcome, EngineOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_data() {
        let media = SimMedia::with_config(SimMediaConfig {
            ready_state: ReadyState::HaveMetadata,
            ..Default::default()
        });

        let loader = media.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            loader.set_ready_state(ReadyState::HaveEnoughData);
        });

        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(outcome, EngineOutcome::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_fails() {
        let media = SimMedia::with_config(SimMediaConfig {
            ready_state: ReadyState::HaveNothing,
            ..Default::default()
        });

        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;

        assert_eq!(outcome, EngineOutcome::Failed);
        assert_eq!(media.play_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_while_waiting_fails() {
        let media = SimMedia::with_config(SimMediaConfig {
            ready_state: ReadyState::HaveNothing,
            ..Default::default()
        });

        let broken = media.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            broken.fail(MediaErrorKind::Decode);
        });

        let outcome = DeterministicPlayEngine::default()
            .attempt(&media, &DeterministicPlayOptions::default())
            .await;
        assert_eq!(outcome, EngineOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_playback_rate() {
        let media = SimMedia::new();
        let opts = DeterministicPlayOptions::default().with_playback_rate(1.5).with_muted(true);
        attempt_deterministic_play(&media, &opts).await;
        assert_eq!(media.playback_rate(), 1.5);
        assert!(media.muted());
    }
}
