//! Arbiter configuration
//!
//! Defaults are tuned for a phone-sized vertical feed. Every section can be
//! overridden from JSON; unspecified fields keep their defaults.

use crate::{engine::ProbeStrategy, Error, PlaybackScope, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for resolver, cache and play engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
}

impl ArbiterConfig {
    /// Config for phones on cellular networks
    pub fn mobile() -> Self {
        Self {
            resolver: ResolverConfig {
                default_downlink_mbps: 1.0,
                ..Default::default()
            },
            cache: CacheConfig {
                capacity: 12,
                ..Default::default()
            },
            engine: EngineConfig {
                ready_timeout_ms: 1500,
                ..Default::default()
            },
        }
    }

    /// Config for desktop browsers with wide viewports
    pub fn desktop() -> Self {
        Self {
            resolver: ResolverConfig {
                default_downlink_mbps: 5.0,
                ..Default::default()
            },
            cache: CacheConfig {
                capacity: 48,
                ..Default::default()
            },
            engine: EngineConfig::default(),
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ArbiterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject configurations that would break arbitration invariants
    pub fn validate(&self) -> Result<()> {
        self.resolver.validate()?;
        self.cache.validate()?;
        self.engine.validate()
    }
}

/// Quality-variant selection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Below this downlink the low tier is preferred (Mbps)
    pub low_threshold_mbps: f64,
    /// Below this downlink the mid tier is preferred (Mbps)
    pub mid_threshold_mbps: f64,
    /// Viewports narrower than this are treated as bandwidth-constrained
    pub small_viewport_px: u32,
    /// Downlink assumed when no network signal is available (Mbps)
    pub default_downlink_mbps: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            low_threshold_mbps: 1.5,
            mid_threshold_mbps: 5.0,
            small_viewport_px: 480,
            default_downlink_mbps: 1.5,
        }
    }
}

impl ResolverConfig {
    fn validate(&self) -> Result<()> {
        if !(self.low_threshold_mbps > 0.0) {
            return Err(Error::config("resolver.low_threshold_mbps must be positive"));
        }
        if self.mid_threshold_mbps < self.low_threshold_mbps {
            return Err(Error::config(
                "resolver.mid_threshold_mbps must not be below low_threshold_mbps",
            ));
        }
        if !(self.default_downlink_mbps >= 0.0) {
            return Err(Error::config("resolver.default_downlink_mbps must be non-negative"));
        }
        Ok(())
    }
}

/// Per-scope source lifecycle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    /// Clear the element source and release decoders on detach
    pub release_on_detach: bool,
    /// Grace window before an unreferenced entry is destroyed
    pub dispose_after_ms: u64,
}

/// Source cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction
    pub capacity: usize,
    /// Carousel tiles are pooled, so their elements keep their source
    pub carousel: ScopePolicy,
    /// The fullscreen viewer frees decoder resources eagerly
    pub viewer: ScopePolicy,
    /// Passed to the adaptive-stream engine for manifest sources
    pub stream: StreamConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 24,
            carousel: ScopePolicy {
                release_on_detach: false,
                dispose_after_ms: 30_000,
            },
            viewer: ScopePolicy {
                release_on_detach: true,
                dispose_after_ms: 10_000,
            },
            stream: StreamConfig::default(),
        }
    }
}

/// Adaptive-stream engine settings for manifest sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Forward buffer target (seconds)
    pub max_buffer_secs: f64,
    /// Start at the lowest rendition and let the engine adapt upwards
    pub start_at_lowest: bool,
    /// Run demuxing in a worker where the engine supports it
    pub enable_worker: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_secs: 10.0,
            start_at_lowest: true,
            enable_worker: true,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self, scope: PlaybackScope) -> ScopePolicy {
        match scope {
            PlaybackScope::Carousel => self.carousel,
            PlaybackScope::Viewer => self.viewer,
        }
    }

    pub fn dispose_after(&self, scope: PlaybackScope) -> Duration {
        Duration::from_millis(self.policy(scope).dispose_after_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::config("cache.capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Deterministic play engine timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for playable data before the first attempt
    pub ready_timeout_ms: u64,
    /// First currentTime sample delay for the sampling probe
    pub short_sample_ms: u64,
    /// Second currentTime sample delay for the sampling probe
    pub long_sample_ms: u64,
    /// Minimum currentTime advance that counts as progress (seconds)
    pub min_advance_secs: f64,
    /// How accepted plays are verified
    pub probe: ProbeStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 1200,
            short_sample_ms: 120,
            long_sample_ms: 360,
            min_advance_secs: 0.01,
            probe: ProbeStrategy::Auto,
        }
    }
}

impl EngineConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.ready_timeout_ms == 0 {
            return Err(Error::config("engine.ready_timeout_ms must be positive"));
        }
        if self.long_sample_ms < self.short_sample_ms {
            return Err(Error::config(
                "engine.long_sample_ms must not be below short_sample_ms",
            ));
        }
        if !(self.min_advance_secs > 0.0) {
            return Err(Error::config("engine.min_advance_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ArbiterConfig::default().validate().is_ok());
        assert!(ArbiterConfig::mobile().validate().is_ok());
        assert!(ArbiterConfig::desktop().validate().is_ok());
    }

    #[test]
    fn test_scope_policies() {
        let config = CacheConfig::default();
        assert!(!config.policy(PlaybackScope::Carousel).release_on_detach);
        assert!(config.policy(PlaybackScope::Viewer).release_on_detach);
        assert_eq!(config.dispose_after(PlaybackScope::Viewer), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ArbiterConfig::from_json_str(r#"{"cache":{"capacity":4}}"#).unwrap();
        assert_eq!(config.cache.capacity, 4);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.cache.viewer, CacheConfig::default().viewer);
    }

    #[test]
    fn test_probe_strategy_from_json() {
        let config = ArbiterConfig::from_json_str(r#"{"engine":{"probe":"sampling"}}"#).unwrap();
        assert_eq!(config.engine.probe, ProbeStrategy::Sampling);
        assert_eq!(config.engine.ready_timeout_ms, EngineConfig::default().ready_timeout_ms);
    }

    #[test]
    fn test_invalid_json_config() {
        let err = ArbiterConfig::from_json_str(r#"{"cache":{"capacity":0}}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let err = ArbiterConfig::from_json_str("not json").unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_PARSE");
    }
}
