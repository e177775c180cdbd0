//! Simulated media elements and stream engine
//!
//! Deterministic stand-ins for browser media used by the CLI simulator and
//! by tests. Time comes from `tokio::time`, so paused-clock tests drive
//! progress and timers together.

use crate::{
    config::StreamConfig,
    media::{
        ElementId, MediaElement, MediaErrorKind, MediaEvent, PlayRejection, ReadyState,
        StreamEngine, StreamHandle,
    },
    Error, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// How the simulated browser treats play requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoplayPolicy {
    /// Every play request is accepted
    #[default]
    Allowed,
    /// Unmuted play requests are refused with `NotAllowedError`
    MutedOnly,
    /// Every play request is refused with `NotAllowedError`
    Denied,
}

/// Scripted response to one play request, overriding the policy
#[derive(Debug, Clone, PartialEq)]
pub enum PlayScript {
    /// Accept; `progress: false` simulates a silent stall
    Accept { progress: bool },
    Reject(PlayRejection),
}

/// Behaviour of a simulated element
#[derive(Debug, Clone)]
pub struct SimMediaConfig {
    pub policy: AutoplayPolicy,
    /// Accepted playback never advances currentTime
    pub stalls: bool,
    /// Time before a play request settles
    pub play_delay: Duration,
    pub ready_state: ReadyState,
    /// Expose a presented-frame counter
    pub frame_callbacks: bool,
    pub duration: Option<f64>,
}

impl Default for SimMediaConfig {
    fn default() -> Self {
        Self {
            policy: AutoplayPolicy::Allowed,
            stalls: false,
            play_delay: Duration::from_millis(20),
            ready_state: ReadyState::HaveEnoughData,
            frame_callbacks: false,
            duration: Some(15.0),
        }
    }
}

#[derive(Debug)]
struct SimState {
    config: SimMediaConfig,
    script: VecDeque<PlayScript>,
    paused: bool,
    muted: bool,
    rate: f64,
    src: Option<String>,
    ready: ReadyState,
    base_time: f64,
    playing_since: Option<Instant>,
    progressing: bool,
    /// Bumped on every play/pause so stale frame tasks stop
    generation: u64,
    play_calls: usize,
    pause_calls: usize,
    load_calls: usize,
}

impl SimState {
    fn settle_time(&mut self) {
        if let Some(since) = self.playing_since.take() {
            if self.progressing {
                self.base_time += since.elapsed().as_secs_f64() * self.rate;
            }
        }
    }
}

struct SimInner {
    id: ElementId,
    state: Mutex<SimState>,
    events: broadcast::Sender<MediaEvent>,
    frames: Option<watch::Sender<u64>>,
}

/// A simulated media element
#[derive(Clone)]
pub struct SimMedia {
    inner: Arc<SimInner>,
}

impl SimMedia {
    pub fn new() -> Self {
        Self::with_config(SimMediaConfig::default())
    }

    pub fn with_config(config: SimMediaConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        let frames = config.frame_callbacks.then(|| watch::channel(0u64).0);
        let state = SimState {
            ready: config.ready_state,
            config,
            script: VecDeque::new(),
            paused: true,
            muted: false,
            rate: 1.0,
            src: None,
            base_time: 0.0,
            playing_since: None,
            progressing: false,
            generation: 0,
            play_calls: 0,
            pause_calls: 0,
            load_calls: 0,
        };

        Self {
            inner: Arc::new(SimInner {
                id: ElementId::new(),
                state: Mutex::new(state),
                events,
                frames,
            }),
        }
    }

    pub fn with_policy(policy: AutoplayPolicy) -> Self {
        Self::with_config(SimMediaConfig {
            policy,
            ..Default::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A poisoned simulator lock only happens after a panicking test
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a scripted response for the next play request
    pub fn push_script(&self, script: PlayScript) {
        self.state().script.push_back(script);
    }

    pub fn set_policy(&self, policy: AutoplayPolicy) {
        self.state().config.policy = policy;
    }

    pub fn set_stalls(&self, stalls: bool) {
        self.state().config.stalls = stalls;
    }

    /// Change readyState, emitting the matching media events
    pub fn set_ready_state(&self, ready: ReadyState) {
        let previous = {
            let mut state = self.state();
            std::mem::replace(&mut state.ready, ready)
        };
        if previous < ReadyState::HaveCurrentData && ready >= ReadyState::HaveCurrentData {
            self.emit(MediaEvent::LoadedData);
        }
        if previous < ReadyState::HaveFutureData && ready >= ReadyState::HaveFutureData {
            self.emit(MediaEvent::CanPlay);
        }
    }

    /// Simulate a media error event
    pub fn fail(&self, kind: MediaErrorKind) {
        self.pause();
        self.emit(MediaEvent::Error(kind));
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn play_calls(&self) -> usize {
        self.state().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state().pause_calls
    }

    pub fn load_calls(&self) -> usize {
        self.state().load_calls
    }

    fn start_frame_task(&self, generation: u64) {
        let Some(frames) = self.inner.frames.clone() else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(FRAME_INTERVAL).await;
                let Some(inner) = inner.upgrade() else { break };
                let alive = {
                    let state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.generation == generation && !state.paused && state.progressing
                };
                if !alive {
                    break;
                }
                frames.send_modify(|n| *n += 1);
            }
        });
    }
}

impl Default for SimMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMedia")
            .field("id", &self.inner.id)
            .field("paused", &self.is_paused())
            .field("muted", &self.muted())
            .finish()
    }
}

#[async_trait]
impl MediaElement for SimMedia {
    fn element_id(&self) -> ElementId {
        self.inner.id
    }

    async fn play(&self) -> std::result::Result<(), PlayRejection> {
        let (delay, response) = {
            let mut state = self.state();
            state.play_calls += 1;
            let response = state.script.pop_front().unwrap_or_else(|| {
                let refused = match state.config.policy {
                    AutoplayPolicy::Allowed => false,
                    AutoplayPolicy::MutedOnly => !state.muted,
                    AutoplayPolicy::Denied => true,
                };
                if refused {
                    PlayScript::Reject(PlayRejection::NotAllowed)
                } else {
                    PlayScript::Accept {
                        progress: !state.config.stalls,
                    }
                }
            });
            (state.config.play_delay, response)
        };

        tokio::time::sleep(delay).await;

        match response {
            PlayScript::Reject(rejection) => Err(rejection),
            PlayScript::Accept { progress } => {
                let generation = {
                    let mut state = self.state();
                    state.settle_time();
                    state.paused = false;
                    state.progressing = progress;
                    state.playing_since = Some(Instant::now());
                    state.generation += 1;
                    state.generation
                };
                if progress {
                    self.emit(MediaEvent::Playing);
                    self.start_frame_task(generation);
                }
                Ok(())
            }
        }
    }

    fn pause(&self) {
        let mut state = self.state();
        state.pause_calls += 1;
        state.settle_time();
        state.paused = true;
        state.generation += 1;
    }

    fn load(&self) {
        let mut state = self.state();
        state.load_calls += 1;
        state.settle_time();
        state.paused = true;
        state.base_time = 0.0;
        state.generation += 1;
    }

    fn current_time(&self) -> f64 {
        let state = self.state();
        match state.playing_since {
            Some(since) if state.progressing && !state.paused => {
                state.base_time + since.elapsed().as_secs_f64() * state.rate
            }
            _ => state.base_time,
        }
    }

    fn duration(&self) -> Option<f64> {
        self.state().config.duration
    }

    fn ready_state(&self) -> ReadyState {
        self.state().ready
    }

    fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn muted(&self) -> bool {
        self.state().muted
    }

    fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    fn playback_rate(&self) -> f64 {
        self.state().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        let mut state = self.state();
        state.settle_time();
        if !state.paused {
            state.playing_since = Some(Instant::now());
        }
        state.rate = rate;
    }

    fn src(&self) -> Option<String> {
        self.state().src.clone()
    }

    fn set_src(&self, src: Option<&str>) {
        let mut state = self.state();
        state.src = src.map(str::to_string);
        if src.is_none() {
            state.settle_time();
            state.paused = true;
            state.base_time = 0.0;
            state.generation += 1;
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.inner.events.subscribe()
    }

    fn frame_counter(&self) -> Option<watch::Receiver<u64>> {
        self.inner.frames.as_ref().map(|tx| tx.subscribe())
    }
}

/// Counters shared by a [`SimStreamEngine`] and its handles
#[derive(Debug, Default)]
pub struct SimStreamStats {
    pub created: AtomicUsize,
    /// Manifest fetches started
    pub loads: AtomicUsize,
    pub attaches: AtomicUsize,
    pub destroys: AtomicUsize,
}

impl SimStreamStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

/// Simulated adaptive-stream engine
#[derive(Debug, Clone)]
pub struct SimStreamEngine {
    supported: bool,
    stats: Arc<SimStreamStats>,
}

impl SimStreamEngine {
    pub fn new() -> Self {
        Self {
            supported: true,
            stats: Arc::new(SimStreamStats::default()),
        }
    }

    /// An engine reporting no MSE support
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn stats(&self) -> Arc<SimStreamStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for SimStreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEngine for SimStreamEngine {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(&self, _config: &StreamConfig) -> Result<Box<dyn StreamHandle>> {
        if !self.supported {
            return Err(Error::StreamEngine("MSE unavailable".to_string()));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimStreamHandle {
            stats: Arc::clone(&self.stats),
            url: None,
            destroyed: false,
        }))
    }
}

struct SimStreamHandle {
    stats: Arc<SimStreamStats>,
    url: Option<String>,
    destroyed: bool,
}

impl StreamHandle for SimStreamHandle {
    fn load_source(&mut self, url: &str) -> Result<()> {
        if self.destroyed {
            return Err(Error::StreamEngine("handle destroyed".to_string()));
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.url = Some(url.to_string());
        Ok(())
    }

    fn attach_media(&mut self, media: &dyn MediaElement) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::StreamEngine("attach before load_source".to_string()))?;
        self.stats.attaches.fetch_add(1, Ordering::SeqCst);
        media.set_src(Some(&format!("blob:{}", url)));
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.stats.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_progress_and_pause() {
        let media = SimMedia::new();
        media.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let t = media.current_time();
        assert!(t > 0.4, "time advanced to {}", t);

        media.pause();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(media.current_time(), t);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_muted_only_policy() {
        let media = SimMedia::with_policy(AutoplayPolicy::MutedOnly);
        assert_eq!(media.play().await, Err(PlayRejection::NotAllowed));
        media.set_muted(true);
        assert!(media.play().await.is_ok());
        assert_eq!(media.play_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_frame_counter() {
        let media = SimMedia::with_config(SimMediaConfig {
            frame_callbacks: true,
            ..Default::default()
        });
        let mut frames = media.frame_counter().unwrap();
        media.play().await.unwrap();
        frames.changed().await.unwrap();
        assert!(*frames.borrow() >= 1);
    }
}
