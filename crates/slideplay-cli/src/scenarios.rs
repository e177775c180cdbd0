//! Built-in arbitration scenarios
//!
//! Each scenario drives a fresh coordinator with simulated media in real
//! time and records what happened, plus the checks that must hold.

use clap::ValueEnum;
use serde::Serialize;
use slideplay_core::{
    coordinator::Affordance,
    media::{EffectiveType, MediaErrorKind},
    sim::{AutoplayPolicy, SimMedia, SimMediaConfig, SimStreamEngine, SimStreamStats},
    ArbiterConfig, CacheStats, DeterministicPlayOptions, MediaElement, MediaSource,
    NetworkSignals, PlayOutcome, PlayRequest, PlaybackCoordinator, QualityVariants, SessionEvent,
    SessionKey, SessionState, StaticSignals,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Swipe through carousel slides with neighbour preloading
    Swipe,
    /// Autoplay policy forces muted fallback, then blocks outright
    AutoplayBlocked,
    /// Accepted play that never advances, then a decode error and retry
    Stall,
    /// Concurrent plays on one key and a reset racing a play
    Supersede,
    /// Fast re-scroll back to a slide inside the disposal grace window
    Rescroll,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Swipe,
        Scenario::AutoplayBlocked,
        Scenario::Stall,
        Scenario::Supersede,
        Scenario::Rescroll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Swipe => "swipe",
            Scenario::AutoplayBlocked => "autoplay-blocked",
            Scenario::Stall => "stall",
            Scenario::Supersede => "supersede",
            Scenario::Rescroll => "rescroll",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Swipe => "Swipe through four carousel slides, preloading the next one",
            Scenario::AutoplayBlocked => "Muted-only autoplay policy, then a browser that refuses all autoplay",
            Scenario::Stall => "Play accepted without progress, decode error, explicit retry",
            Scenario::Supersede => "Last initiated play wins; reset discards an in-flight play",
            Scenario::Rescroll => "Detach and reattach an HLS slide without refetching the manifest",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded action
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct Step {
    #[tabled(rename = "t (ms)")]
    pub at_ms: u64,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Result")]
    pub result: String,
}

/// A property the scenario expects to hold
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub description: &'static str,
    pub steps: Vec<Step>,
    pub checks: Vec<Check>,
    pub events: Vec<SessionEvent>,
    pub cache: CacheStats,
    pub passed: bool,
}

struct Run {
    coordinator: PlaybackCoordinator,
    streams: Arc<SimStreamStats>,
    start: Instant,
    steps: Vec<Step>,
    checks: Vec<Check>,
}

impl Run {
    fn step(&mut self, action: impl Into<String>, result: impl fmt::Display) {
        self.steps.push(Step {
            at_ms: self.start.elapsed().as_millis() as u64,
            action: action.into(),
            result: result.to_string(),
        });
    }

    fn check(&mut self, name: impl Into<String>, passed: bool) {
        self.checks.push(Check {
            name: name.into(),
            passed,
        });
    }
}

fn request(key: SessionKey, media: &SimMedia) -> PlayRequest {
    PlayRequest::new(key, Arc::new(media.clone()))
}

/// Run one scenario on a fresh coordinator
pub async fn run(scenario: Scenario, config: &ArbiterConfig) -> anyhow::Result<ScenarioReport> {
    let engine = SimStreamEngine::new();
    let streams = engine.stats();
    let signals = StaticSignals::new(
        NetworkSignals {
            effective_type: Some(EffectiveType::FourG),
            downlink_mbps: Some(8.0),
            ..Default::default()
        },
        Some(390),
    );
    let coordinator = PlaybackCoordinator::from_config(config, Arc::new(signals), Arc::new(engine))?;
    let mut events = coordinator.controller().subscribe();

    let mut run = Run {
        coordinator,
        streams,
        start: Instant::now(),
        steps: Vec::new(),
        checks: Vec::new(),
    };

    match scenario {
        Scenario::Swipe => swipe(&mut run).await?,
        Scenario::AutoplayBlocked => autoplay_blocked(&mut run).await?,
        Scenario::Stall => stall(&mut run).await?,
        Scenario::Supersede => supersede(&mut run).await?,
        Scenario::Rescroll => rescroll(&mut run).await?,
    }

    let cache = run.coordinator.cache().stats().await;
    run.coordinator.shutdown().await;

    let mut collected = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => collected.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    let passed = run.checks.iter().all(|c| c.passed);
    Ok(ScenarioReport {
        scenario,
        description: scenario.description(),
        steps: run.steps,
        checks: run.checks,
        events: collected,
        cache,
        passed,
    })
}

async fn swipe(run: &mut Run) -> anyhow::Result<()> {
    let tiles: Vec<SimMedia> = (0..4).map(|_| SimMedia::new()).collect();
    let sources: Vec<MediaSource> = (0..5)
        .map(|i| {
            QualityVariants::new()
                .with_low(format!("https://cdn.example.com/feed/{}/480.mp4", i))
                .with_high(format!("https://cdn.example.com/feed/{}/1080.mp4", i))
                .into()
        })
        .collect();

    for (i, tile) in tiles.iter().enumerate() {
        let key = SessionKey::carousel(i.to_string());
        let outcome = run
            .coordinator
            .activate(
                request(key.clone(), tile).with_options(DeterministicPlayOptions::preview()),
                &sources[i],
            )
            .await?;
        run.step(format!("swipe to {}", key), outcome);

        let next = (SessionKey::carousel((i + 1).to_string()), sources[i + 1].clone());
        let primed = run.coordinator.preload_neighbors(&[next]).await;
        run.step(format!("preload carousel:{}", i + 1), format!("{} primed", primed));

        if i > 0 {
            let previous = SessionKey::carousel((i - 1).to_string());
            run.coordinator.deactivate(&previous, Some(&tiles[i - 1])).await;
            run.step(format!("detach {}", previous), "released");
        }
    }

    let playing = tiles.iter().filter(|t| !t.is_paused()).count();
    run.check("exactly one tile unpaused", playing == 1);
    run.check("last slide is the one playing", !tiles[3].is_paused());
    run.check(
        "carousel tiles keep their source after detach",
        tiles[0].src().is_some(),
    );
    Ok(())
}

async fn autoplay_blocked(run: &mut Run) -> anyhow::Result<()> {
    let muted_only = SimMedia::with_policy(AutoplayPolicy::MutedOnly);
    let a = SessionKey::viewer("a");
    let outcome = run
        .coordinator
        .activate(request(a.clone(), &muted_only), &"https://cdn.example.com/a.mp4".into())
        .await?;
    run.step(format!("play {} unmuted", a), outcome);
    run.check("muted-only policy still plays", outcome == PlayOutcome::Playing);
    run.check("element left muted after fallback", muted_only.muted());

    let denied = SimMedia::with_policy(AutoplayPolicy::Denied);
    let b = SessionKey::viewer("b");
    let outcome = run
        .coordinator
        .activate(request(b.clone(), &denied), &"https://cdn.example.com/b.mp4".into())
        .await?;
    let affordance = Affordance::for_outcome(outcome);
    run.step(format!("play {}", b), format!("{} ({:?})", outcome, affordance));
    run.check("refused autoplay is blocked", outcome == PlayOutcome::Blocked);
    run.check("blocked shows a play button", affordance == Affordance::PlayButton);
    run.check("superseded viewer slot paused", muted_only.is_paused());
    let state = run.coordinator.controller().state(&b).await;
    run.check("blocked slot is idle", state == SessionState::Idle);
    Ok(())
}

async fn stall(run: &mut Run) -> anyhow::Result<()> {
    let media = SimMedia::with_config(SimMediaConfig {
        stalls: true,
        ..Default::default()
    });
    let key = SessionKey::viewer("stall");
    let src: MediaSource = "https://cdn.example.com/stall/master.m3u8".into();

    let outcome = run.coordinator.activate(request(key.clone(), &media), &src).await?;
    run.step(format!("play {}", key), outcome);
    run.check("silent stall is a failure", outcome == PlayOutcome::Failed);
    run.check("stalled element paused", media.is_paused());

    media.fail(MediaErrorKind::Decode);
    let affordance = run.coordinator.on_media_error(&key, MediaErrorKind::Decode).await;
    run.step("decode error", format!("{:?}", affordance));
    run.check("decode error offers retry", affordance == Affordance::Retry);

    media.set_stalls(false);
    let outcome = run.coordinator.retry(request(key.clone(), &media), &src).await?;
    run.step(format!("retry {}", key), outcome);
    run.check("retry plays", outcome == PlayOutcome::Playing);
    let rebuilt = run.streams.created() == 2 && run.streams.destroys() == 1;
    run.check("retry rebuilt the stream", rebuilt);
    Ok(())
}

async fn supersede(run: &mut Run) -> anyhow::Result<()> {
    let controller = Arc::clone(run.coordinator.controller());
    let slow = SimMedia::with_config(SimMediaConfig {
        play_delay: Duration::from_millis(400),
        ..Default::default()
    });
    let fast = SimMedia::new();
    let key = SessionKey::viewer("x");

    let (first, second) = tokio::join!(
        controller.play(request(key.clone(), &slow)),
        controller.play(request(key.clone(), &fast)),
    );
    let (first, second) = (first?, second?);
    run.step(format!("play {} (slow element)", key), first);
    run.step(format!("play {} (fast element)", key), second);
    run.check("first call cancelled", first == PlayOutcome::Cancelled);
    run.check("last call wins", second == PlayOutcome::Playing);
    run.check("loser paused", slow.is_paused());

    let media = SimMedia::new();
    let key = SessionKey::viewer("y");
    let (outcome, existed) = tokio::join!(controller.play(request(key.clone(), &media)), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.reset(key.scope, &key.id).await
    });
    let outcome = outcome?;
    run.step(format!("play {} then reset", key), format!("{} (reset hit: {})", outcome, existed));
    run.check("reset discards in-flight play", outcome == PlayOutcome::Cancelled);
    let state = controller.state(&key).await;
    run.check("stale result does not resurrect the session", state == SessionState::Idle);
    Ok(())
}

async fn rescroll(run: &mut Run) -> anyhow::Result<()> {
    let cache = Arc::clone(run.coordinator.cache());
    let media = SimMedia::new();
    let key = SessionKey::carousel("hls");
    let src: MediaSource = "https://cdn.example.com/hls/master.m3u8".into();

    cache.preload(&key, &src).await?;
    run.step(format!("preload {}", key), format!("{} manifest fetch", run.streams.loads()));

    cache.attach(&media, &key, &src).await?;
    run.step(format!("attach {}", key), media.src().unwrap_or_default());

    cache.detach(&key, Some(&media)).await;
    run.step(format!("detach {}", key), "grace window started");

    tokio::time::sleep(Duration::from_millis(250)).await;
    cache.attach(&media, &key, &src).await?;
    let ref_count = cache.entry_info(&key).await.map(|e| e.ref_count).unwrap_or(0);
    run.step(format!("reattach {}", key), format!("ref count {}", ref_count));

    let loads = run.streams.loads();
    run.check("no second manifest fetch", loads == 1);
    run.check("reference count back to one", ref_count == 1);
    Ok(())
}
