//! Platform boundary: media elements, adaptive-stream engines and network
//! signals.
//!
//! The core never touches a DOM directly. A host (browser bindings, a native
//! shell or the simulator in [`crate::sim`]) implements these traits.

use crate::{config::StreamConfig, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Identity of a physical media element, stable across source rebinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTMLMediaElement.readyState
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    /// Enough data to render the current frame
    pub fn can_attempt_play(&self) -> bool {
        *self >= ReadyState::HaveCurrentData
    }
}

/// Why a play request was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayRejection {
    /// Autoplay policy denial (`NotAllowedError`)
    NotAllowed,
    /// Interrupted by a pause or a new load (`AbortError`)
    Aborted,
    /// No supported source (`NotSupportedError`)
    NotSupported,
    Other(String),
}

impl PlayRejection {
    /// Only a policy denial is recoverable through a muted retry
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, PlayRejection::NotAllowed)
    }

    /// Classify a DOMException name
    pub fn from_dom_name(name: &str) -> Self {
        match name {
            "NotAllowedError" => PlayRejection::NotAllowed,
            "AbortError" => PlayRejection::Aborted,
            "NotSupportedError" => PlayRejection::NotSupported,
            other => PlayRejection::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for PlayRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayRejection::NotAllowed => write!(f, "NotAllowedError"),
            PlayRejection::Aborted => write!(f, "AbortError"),
            PlayRejection::NotSupported => write!(f, "NotSupportedError"),
            PlayRejection::Other(name) => write!(f, "{}", name),
        }
    }
}

/// MediaError.code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaErrorKind {
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
}

/// Standard media events the core listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    CanPlay,
    LoadedData,
    Playing,
    Waiting,
    Stalled,
    Error(MediaErrorKind),
}

/// A DOM-like media element.
///
/// Setters take `&self`: implementations are handles onto an element owned by
/// the host, like a `web_sys::HtmlMediaElement`.
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn element_id(&self) -> ElementId;

    /// Request playback; resolves when the platform accepts the request
    async fn play(&self) -> std::result::Result<(), PlayRejection>;

    fn pause(&self);

    fn load(&self);

    fn current_time(&self) -> f64;

    fn duration(&self) -> Option<f64>;

    fn ready_state(&self) -> ReadyState;

    fn is_paused(&self) -> bool;

    fn muted(&self) -> bool;

    fn set_muted(&self, muted: bool);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    fn src(&self) -> Option<String>;

    /// `None` removes the source attribute
    fn set_src(&self, src: Option<&str>);

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Presented-frame counter, when the platform exposes frame callbacks
    fn frame_counter(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Shared handle to a media element
pub type MediaHandle = Arc<dyn MediaElement>;

/// Instance of an adaptive-streaming engine bound to one source
pub trait StreamHandle: Send + Sync {
    /// Begin fetching the manifest
    fn load_source(&mut self, url: &str) -> Result<()>;

    fn attach_media(&mut self, media: &dyn MediaElement) -> Result<()>;

    /// Release native resources; the handle is unusable afterwards
    fn destroy(&mut self);
}

/// Factory for adaptive-stream handles (hls.js and friends)
pub trait StreamEngine: Send + Sync {
    /// Whether the platform supports this engine (MSE availability)
    fn is_supported(&self) -> bool;

    fn create(&self, config: &StreamConfig) -> Result<Box<dyn StreamHandle>>;
}

/// Stream engine for hosts without MSE: manifests are played natively
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOnly;

impl StreamEngine for NativeOnly {
    fn is_supported(&self) -> bool {
        false
    }

    fn create(&self, _config: &StreamConfig) -> Result<Box<dyn StreamHandle>> {
        Err(crate::Error::StreamEngine(
            "no adaptive-stream engine on this platform".to_string(),
        ))
    }
}

/// Network Information API effectiveType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveType {
    /// Representative downlink for the connection class (Mbps)
    pub fn typical_downlink_mbps(&self) -> f64 {
        match self {
            EffectiveType::Slow2g => 0.05,
            EffectiveType::TwoG => 0.25,
            EffectiveType::ThreeG => 0.7,
            EffectiveType::FourG => 10.0,
        }
    }
}

impl std::str::FromStr for EffectiveType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "slow-2g" => Ok(EffectiveType::Slow2g),
            "2g" => Ok(EffectiveType::TwoG),
            "3g" => Ok(EffectiveType::ThreeG),
            "4g" => Ok(EffectiveType::FourG),
            other => Err(crate::Error::config(format!("unknown effective type: {}", other))),
        }
    }
}

/// Snapshot of `navigator.connection`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSignals {
    pub save_data: bool,
    pub effective_type: Option<EffectiveType>,
    /// Estimated downlink in Mbps
    pub downlink_mbps: Option<f64>,
}

/// Source of network and viewport signals
pub trait SignalProvider: Send + Sync {
    fn network(&self) -> NetworkSignals;

    fn viewport_width(&self) -> Option<u32>;
}

/// Fixed signals, for hosts that sample once and for tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticSignals {
    pub network: NetworkSignals,
    pub viewport_width: Option<u32>,
}

impl StaticSignals {
    pub fn new(network: NetworkSignals, viewport_width: Option<u32>) -> Self {
        Self { network, viewport_width }
    }
}

impl SignalProvider for StaticSignals {
    fn network(&self) -> NetworkSignals {
        self.network
    }

    fn viewport_width(&self) -> Option<u32> {
        self.viewport_width
    }
}
