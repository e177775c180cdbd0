//! Core types for Slideplay

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Independent arbitration domain. Sessions in different scopes never
/// cancel each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackScope {
    /// Preview tiles in the feed carousel
    Carousel,
    /// The single fullscreen slide
    Viewer,
}

impl PlaybackScope {
    pub const ALL: [PlaybackScope; 2] = [PlaybackScope::Carousel, PlaybackScope::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackScope::Carousel => "carousel",
            PlaybackScope::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for PlaybackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "carousel" => Ok(PlaybackScope::Carousel),
            "viewer" => Ok(PlaybackScope::Viewer),
            other => Err(Error::UnknownScope(other.to_string())),
        }
    }
}

/// Composite (scope, media id) identifying one playable slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub scope: PlaybackScope,
    pub id: String,
}

impl SessionKey {
    pub fn new(scope: PlaybackScope, id: impl Into<String>) -> Self {
        Self { scope, id: id.into() }
    }

    pub fn carousel(id: impl Into<String>) -> Self {
        Self::new(PlaybackScope::Carousel, id)
    }

    pub fn viewer(id: impl Into<String>) -> Self {
        Self::new(PlaybackScope::Viewer, id)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    /// Parses the `scope:id` form used in logs and the CLI
    fn from_str(s: &str) -> Result<Self> {
        let (scope, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidKey(s.to_string()))?;
        if id.is_empty() {
            return Err(Error::InvalidKey(s.to_string()));
        }
        Ok(Self::new(scope.parse()?, id))
    }
}

/// Coarse quality tier of a variant set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Mid,
    High,
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityTier::Low => write!(f, "low"),
            QualityTier::Mid => write!(f, "mid"),
            QualityTier::High => write!(f, "high"),
        }
    }
}

/// Optional per-tier URLs for progressive (non-streaming) sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityVariants {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
}

impl QualityVariants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_low(mut self, url: impl Into<String>) -> Self {
        self.low = Some(url.into());
        self
    }

    pub fn with_mid(mut self, url: impl Into<String>) -> Self {
        self.mid = Some(url.into());
        self
    }

    pub fn with_high(mut self, url: impl Into<String>) -> Self {
        self.high = Some(url.into());
        self
    }

    /// URL for a tier, treating empty strings as absent
    pub fn get(&self, tier: QualityTier) -> Option<&str> {
        let url = match tier {
            QualityTier::Low => self.low.as_deref(),
            QualityTier::Mid => self.mid.as_deref(),
            QualityTier::High => self.high.as_deref(),
        };
        url.filter(|u| !u.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        [QualityTier::Low, QualityTier::Mid, QualityTier::High]
            .iter()
            .all(|t| self.get(*t).is_none())
    }
}

/// Source of a media item: a single URL or a quality-variant set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSource {
    Url(String),
    Variants(QualityVariants),
}

impl From<&str> for MediaSource {
    fn from(url: &str) -> Self {
        MediaSource::Url(url.to_string())
    }
}

impl From<String> for MediaSource {
    fn from(url: String) -> Self {
        MediaSource::Url(url)
    }
}

impl From<QualityVariants> for MediaSource {
    fn from(variants: QualityVariants) -> Self {
        MediaSource::Variants(variants)
    }
}

/// Outcome of a single deterministic play attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineOutcome {
    /// Playback accepted and real progress observed
    Playing,
    /// Autoplay policy refused playback, including after a muted retry
    Blocked,
    /// Readiness timeout, media error, silent stall or non-policy rejection
    Failed,
}

/// Outcome of an arbitrated play request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayOutcome {
    Playing,
    Blocked,
    Failed,
    /// A newer request for the key (or a reset) superseded this one
    Cancelled,
}

impl PlayOutcome {
    /// `Cancelled` is an expected arbitration result, not a failure to show
    pub fn is_user_visible_failure(&self) -> bool {
        matches!(self, PlayOutcome::Failed)
    }
}

impl From<EngineOutcome> for PlayOutcome {
    fn from(outcome: EngineOutcome) -> Self {
        match outcome {
            EngineOutcome::Playing => PlayOutcome::Playing,
            EngineOutcome::Blocked => PlayOutcome::Blocked,
            EngineOutcome::Failed => PlayOutcome::Failed,
        }
    }
}

impl std::fmt::Display for PlayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayOutcome::Playing => write!(f, "playing"),
            PlayOutcome::Blocked => write!(f, "blocked"),
            PlayOutcome::Failed => write!(f, "failed"),
            PlayOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Controller state for one session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    Idle,
    /// Token minted, play engine in flight
    Pending,
    /// Engine confirmed playback
    Active,
}

impl SessionState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Pending) |
            // Superseded by a newer request for the same key
            (Pending, Pending) | (Active, Pending) |
            (Pending, Active) | (Pending, Idle) |
            (Active, Idle)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Pending => write!(f, "pending"),
            SessionState::Active => write!(f, "active"),
        }
    }
}

/// Input contract of the deterministic play engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeterministicPlayOptions {
    pub muted: bool,
    pub playback_rate: f64,
    /// Retry once muted when the policy refuses unmuted playback
    pub allow_auto_mute: bool,
    pub verify_window_ms: u64,
}

impl Default for DeterministicPlayOptions {
    fn default() -> Self {
        Self {
            muted: false,
            playback_rate: 1.0,
            allow_auto_mute: true,
            verify_window_ms: 600,
        }
    }
}

impl DeterministicPlayOptions {
    /// Options for carousel previews, which always play muted
    pub fn preview() -> Self {
        Self {
            muted: true,
            ..Default::default()
        }
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn with_playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = rate;
        self
    }

    pub fn with_auto_mute(mut self, allow: bool) -> Self {
        self.allow_auto_mute = allow;
        self
    }

    pub fn with_verify_window_ms(mut self, ms: u64) -> Self {
        self.verify_window_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_parse() {
        let key: SessionKey = "carousel:42".parse().unwrap();
        assert_eq!(key, SessionKey::carousel("42"));
        assert_eq!(key.to_string(), "carousel:42");

        assert!("carousel".parse::<SessionKey>().is_err());
        assert!("viewer:".parse::<SessionKey>().is_err());
        assert!(matches!(
            "grid:1".parse::<SessionKey>(),
            Err(Error::UnknownScope(_))
        ));
    }

    #[test]
    fn test_variants_treat_empty_as_absent() {
        let variants = QualityVariants::new().with_low("").with_mid("m.mp4");
        assert_eq!(variants.get(QualityTier::Low), None);
        assert_eq!(variants.get(QualityTier::Mid), Some("m.mp4"));
        assert!(!variants.is_empty());
        assert!(QualityVariants::new().with_high("").is_empty());
    }

    #[test]
    fn test_media_source_json() {
        let single: MediaSource = serde_json::from_str(r#""https://cdn/a.mp4""#).unwrap();
        assert_eq!(single, MediaSource::from("https://cdn/a.mp4"));

        let variants: MediaSource = serde_json::from_str(r#"{"low":"l.mp4"}"#).unwrap();
        assert_eq!(
            variants,
            MediaSource::Variants(QualityVariants::new().with_low("l.mp4"))
        );
    }

    #[test]
    fn test_only_failures_are_user_visible() {
        assert!(PlayOutcome::Failed.is_user_visible_failure());
        assert!(!PlayOutcome::Cancelled.is_user_visible_failure());
        assert!(!PlayOutcome::Blocked.is_user_visible_failure());
        assert_eq!(PlayOutcome::from(EngineOutcome::Failed), PlayOutcome::Failed);
    }

    #[test]
    fn test_session_state_transitions() {
        assert!(SessionState::Idle.can_transition_to(SessionState::Pending));
        assert!(SessionState::Pending.can_transition_to(SessionState::Active));
        assert!(SessionState::Active.can_transition_to(SessionState::Idle));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Active));
    }
}
